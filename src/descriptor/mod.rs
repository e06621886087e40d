//! Parsing and expansion of descriptor expressions into concrete output scripts.
//!
//! Three families are understood:
//! - `addr(<address>)`, checked against the configured network,
//! - `raw(<hex>)`,
//! - anything [`miniscript`] parses as a `Descriptor<DescriptorPublicKey>`.
//!
//! Each may carry a `#checksum` suffix. Ranged descriptors are derived over
//! the requested range, multipath key expressions over every path.
pub mod checksum;

use bitcoin::{Address, ScriptBuf};
use miniscript::{Descriptor, DescriptorPublicKey};
use serde::Deserialize;
use std::str::FromStr;

use crate::{config::ActivityConfig, error::ActivityError};

/// Highest non-hardened child index.
const MAX_RANGE_END: u32 = 0x7fff_ffff;

/// Derivation range of a ranged descriptor, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DerivationRange {
    /// `n` means `0..=n`.
    End(u32),
    /// `[begin, end]`.
    Span([u32; 2]),
}

impl DerivationRange {
    fn bounds(self) -> (u32, u32) {
        match self {
            DerivationRange::End(end) => (0, end),
            DerivationRange::Span([begin, end]) => (begin, end),
        }
    }
}

/// One descriptor of a query, as a bare string or `{ "desc": ..., "range": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DescriptorRequest {
    /// Descriptor string; ranged descriptors use the default range.
    Plain(String),
    /// Descriptor string with an explicit derivation range.
    Ranged {
        /// Descriptor string.
        desc: String,
        /// Derivation range; default range when absent.
        #[serde(default)]
        range: Option<DerivationRange>,
    },
}

impl DescriptorRequest {
    /// The descriptor string exactly as given. Records echo this back.
    pub fn descriptor(&self) -> &str {
        match self {
            DescriptorRequest::Plain(desc) | DescriptorRequest::Ranged { desc, .. } => desc,
        }
    }

    fn range(&self) -> Option<DerivationRange> {
        match self {
            DescriptorRequest::Plain(_) => None,
            DescriptorRequest::Ranged { range, .. } => *range,
        }
    }
}

impl From<&str> for DescriptorRequest {
    fn from(s: &str) -> Self {
        DescriptorRequest::Plain(s.to_string())
    }
}

impl From<String> for DescriptorRequest {
    fn from(s: String) -> Self {
        DescriptorRequest::Plain(s)
    }
}

/// Expand one request into every script it denotes.
pub fn expand(
    request: &DescriptorRequest,
    config: &ActivityConfig,
) -> Result<Vec<ScriptBuf>, ActivityError> {
    let text = request.descriptor();
    let invalid = |reason: String| ActivityError::invalid_descriptor(text, reason);

    let body = checksum::strip_checksum(text.trim()).map_err(invalid)?;

    if let Some(inner) = call_argument(body, "addr") {
        let address = Address::from_str(inner)
            .map_err(|e| invalid(e.to_string()))?
            .require_network(config.network)
            .map_err(|e| invalid(e.to_string()))?;
        return Ok(vec![address.script_pubkey()]);
    }

    if let Some(inner) = call_argument(body, "raw") {
        let bytes = hex::decode(inner).map_err(|e| invalid(e.to_string()))?;
        return Ok(vec![ScriptBuf::from_bytes(bytes)]);
    }

    let descriptor =
        Descriptor::<DescriptorPublicKey>::from_str(body).map_err(|e| invalid(e.to_string()))?;
    let singles = descriptor
        .into_single_descriptors()
        .map_err(|e| invalid(e.to_string()))?;

    let (begin, end) = if singles.iter().any(|d| d.has_wildcard()) {
        derivation_bounds(request.range(), config).map_err(invalid)?
    } else {
        (0, 0)
    };

    let mut scripts = Vec::new();
    for single in &singles {
        let indexes = if single.has_wildcard() { begin..=end } else { 0..=0 };
        for index in indexes {
            let derived = single
                .at_derivation_index(index)
                .map_err(|e| invalid(format!("cannot derive index {index}: {e}")))?;
            scripts.push(derived.script_pubkey());
        }
    }
    Ok(scripts)
}

fn call_argument<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    body.strip_prefix(name)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn derivation_bounds(
    range: Option<DerivationRange>,
    config: &ActivityConfig,
) -> Result<(u32, u32), String> {
    let (begin, end) = range
        .map(DerivationRange::bounds)
        .unwrap_or((0, config.default_range_end));
    if end < begin {
        return Err(format!("range end {end} is before range begin {begin}"));
    }
    if end > MAX_RANGE_END {
        return Err("range end should be lower than 2^31".to_string());
    }
    if u64::from(end - begin) >= u64::from(config.max_range_size) {
        return Err(format!(
            "range is too large: {} scripts, at most {}",
            u64::from(end - begin) + 1,
            config.max_range_size
        ));
    }
    Ok((begin, end))
}

#[cfg(test)]
mod test {
    use super::*;
    use bitcoin::{hashes::Hash, Network, WPubkeyHash};

    const TPUB: &str = "tpubD6NzVbkrYhZ4XHndKkuB8FifXm8r5FQHwrN6oZuWCz13qb93rtgKvD4PQsqC4HP4yhV3tA2fqr2RbY5mNXfM7RxXUoeABoDtsFUq2zJq6YK";

    fn regtest_address(seed: u8) -> (ScriptBuf, String) {
        let spk = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([seed; 20]));
        let addr = Address::from_script(&spk, Network::Regtest).unwrap();
        (spk, addr.to_string())
    }

    #[test]
    fn addr_expands_to_its_script() {
        let (spk, addr) = regtest_address(1);
        let request: DescriptorRequest = format!("addr({addr})").into();
        let got = expand(&request, &ActivityConfig::default()).unwrap();
        assert_eq!(got, vec![spk]);
    }

    #[test]
    fn addr_on_wrong_network_is_rejected() {
        let (_, addr) = regtest_address(1);
        let cfg = ActivityConfig::default().with_network(Network::Bitcoin);
        let err = expand(&format!("addr({addr})").as_str().into(), &cfg).unwrap_err();
        assert!(matches!(err, ActivityError::InvalidDescriptor { .. }));
    }

    #[test]
    fn raw_with_checksum() {
        let got = expand(&"raw(deadbeef)#89f8spxm".into(), &ActivityConfig::default()).unwrap();
        assert_eq!(got, vec![ScriptBuf::from_bytes(vec![0xde, 0xad, 0xbe, 0xef])]);

        let err = expand(&"raw(deadbeef)#00000000".into(), &ActivityConfig::default()).unwrap_err();
        assert!(matches!(err, ActivityError::InvalidDescriptor { .. }));
    }

    #[test]
    fn ranged_descriptor_uses_requested_range() {
        let request = DescriptorRequest::Ranged {
            desc: format!("wpkh({TPUB}/1/2/*)"),
            range: Some(DerivationRange::Span([3, 7])),
        };
        let got = expand(&request, &ActivityConfig::default()).unwrap();
        assert_eq!(got.len(), 5);

        let plain: DescriptorRequest = format!("wpkh({TPUB}/1/2/*)").into();
        let default_range = expand(&plain, &ActivityConfig::default()).unwrap();
        assert_eq!(default_range.len(), 1001);
        assert_eq!(&default_range[3..8], &got[..]);
    }

    #[test]
    fn oversized_or_inverted_range_is_rejected() {
        let inverted = DescriptorRequest::Ranged {
            desc: format!("wpkh({TPUB}/0/*)"),
            range: Some(DerivationRange::Span([9, 2])),
        };
        assert!(expand(&inverted, &ActivityConfig::default()).is_err());

        let mut cfg = ActivityConfig::default();
        cfg.max_range_size = 10;
        let too_big = DescriptorRequest::Ranged {
            desc: format!("wpkh({TPUB}/0/*)"),
            range: Some(DerivationRange::End(10)),
        };
        assert!(expand(&too_big, &cfg).is_err());
    }

    #[test]
    fn multipath_expands_every_path() {
        let request = DescriptorRequest::Ranged {
            desc: format!("wpkh({TPUB}/<0;1>/*)"),
            range: Some(DerivationRange::End(1)),
        };
        let got = expand(&request, &ActivityConfig::default()).unwrap();
        assert_eq!(got.len(), 4);
    }

    #[test]
    fn garbage_is_invalid() {
        for bad in ["", "nonsense", "addr(notanaddress)", "raw(xyz)", "wpkh(02)"] {
            let err = expand(&bad.into(), &ActivityConfig::default()).unwrap_err();
            assert!(matches!(err, ActivityError::InvalidDescriptor { .. }), "{bad}");
        }
    }

    #[test]
    fn request_deserializes_from_string_or_object() {
        let json = r#"["raw(00)", {"desc": "raw(01)", "range": [1, 4]}, {"desc": "raw(02)"}]"#;
        let got: Vec<DescriptorRequest> = serde_json::from_str(json).unwrap();
        assert_eq!(got[0], DescriptorRequest::Plain("raw(00)".into()));
        assert_eq!(got[1].range(), Some(DerivationRange::Span([1, 4])));
        assert_eq!(got[2].descriptor(), "raw(02)");
    }
}
