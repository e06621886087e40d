//! Script → descriptor lookup built once per query.
use bitcoin::{Script, ScriptBuf};
use std::collections::HashMap;

use crate::{
    config::ActivityConfig,
    descriptor::{self, DescriptorRequest},
    error::ActivityError,
};

/// Immutable map from canonical script bytes to every descriptor string that derives it.
///
/// Shared read-only across block scans; never mutated after [`ScriptIndex::build`].
#[derive(Debug, Default, Clone)]
pub struct ScriptIndex {
    by_script: HashMap<ScriptBuf, Vec<String>>,
}

impl ScriptIndex {
    /// Expand all requests. Fails on the first descriptor that does not parse.
    pub fn build(
        requests: &[DescriptorRequest],
        config: &ActivityConfig,
    ) -> Result<Self, ActivityError> {
        let mut by_script: HashMap<ScriptBuf, Vec<String>> = HashMap::new();
        for request in requests {
            let label = request.descriptor();
            for script in descriptor::expand(request, config)? {
                let labels = by_script.entry(script).or_default();
                if !labels.iter().any(|l| l == label) {
                    labels.push(label.to_string());
                }
            }
        }
        Ok(Self { by_script })
    }

    /// Descriptor strings matching `script`, in request order. Empty if none.
    pub fn matches(&self, script: &Script) -> &[String] {
        self.by_script
            .get(script)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of distinct scripts watched.
    pub fn script_count(&self) -> usize {
        self.by_script.len()
    }

    /// True when nothing can ever match.
    pub fn is_empty(&self) -> bool {
        self.by_script.is_empty()
    }
}
