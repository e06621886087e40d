//! BIP-380 descriptor checksums.
use miniscript::descriptor::checksum::desc_checksum;

/// Split off and verify an optional `#checksum` suffix, returning the bare body.
///
/// The body is checksummed even when no suffix is given, so characters outside
/// the descriptor charset are rejected either way.
pub fn strip_checksum(desc: &str) -> Result<&str, String> {
    let (body, given) = match desc.split_once('#') {
        Some((body, given)) => (body, Some(given)),
        None => (desc, None),
    };
    let expected = desc_checksum(body).map_err(|e| e.to_string())?;
    match given {
        Some(given) if given != expected => Err(format!(
            "checksum mismatch: provided {given}, expected {expected}"
        )),
        _ => Ok(body),
    }
}
