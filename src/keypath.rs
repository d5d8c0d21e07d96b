//! Conversion between logical secret keys and backend paths.
//!
//! A logical key has exactly four `/`-separated segments:
//! `{service}/{project}/{deploy_group}/{key_name}`. Only the key name may
//! contain literal separators, which are escaped on the backend path.

use crate::error::{Result, SecretError};

/// `/` means directory on the backend, so all keys stay at the same depth.
pub const DIRECTORY_SEPARATOR: &str = "/";
/// Number of segments in a well-formed logical key.
pub const KEY_SEGMENTS: usize = 4;

const ESCAPED_SEPARATOR: &str = "%2F";

/// Convert a logical key into its backend path, escaping separators inside
/// the key name segment.
pub fn encode_path(key: &str) -> Result<String> {
    convert_path(key, |last| {
        last.replace(DIRECTORY_SEPARATOR, ESCAPED_SEPARATOR)
    })
}

/// Convert a backend path back into its logical key.
pub fn decode_path(path: &str) -> Result<String> {
    convert_path(path, |last| {
        last.replace(ESCAPED_SEPARATOR, DIRECTORY_SEPARATOR)
    })
}

/// Split out the deploy group segment of a logical key, used to pick the
/// backend that serves it.
pub fn deploy_group_of(key: &str) -> Result<&str> {
    let parts: Vec<&str> = key.splitn(KEY_SEGMENTS, DIRECTORY_SEPARATOR).collect();
    if parts.len() < KEY_SEGMENTS || parts[KEY_SEGMENTS - 1].is_empty() {
        return Err(SecretError::invalid_key(key));
    }
    Ok(parts[2])
}

// The key name is the last segment and is the only one allowed to contain
// separators itself.
fn convert_path(key: &str, convert_last: fn(&str) -> String) -> Result<String> {
    let parts: Vec<&str> = key.splitn(KEY_SEGMENTS, DIRECTORY_SEPARATOR).collect();
    if parts.len() < KEY_SEGMENTS || parts[KEY_SEGMENTS - 1].is_empty() {
        return Err(SecretError::invalid_key(key));
    }

    let mut segments: Vec<String> = parts[..KEY_SEGMENTS - 1]
        .iter()
        .map(|s| s.to_string())
        .collect();
    segments.push(convert_last(parts[KEY_SEGMENTS - 1]));

    Ok(segments.join(DIRECTORY_SEPARATOR))
}
