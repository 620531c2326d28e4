//! `/dev/xvd*` block-device naming used by EBS-style volumes.
//!
//! Suffixes run `b`..`z`, then `ba`..`bz`, then `ca`..`cz`. `xvda` is the
//! root volume and never handed out.

use crate::error::{PlatformError, PlatformResult};

const PREFIX: &str = "/dev/xvd";

pub fn first_xvd_device() -> String {
    format!("{PREFIX}b")
}

/// Successor of `last` in allocation order.
pub fn next_xvd_device(last: &str) -> PlatformResult<String> {
    let invalid = || PlatformError::InvalidDevice(last.to_string());
    let suffix = last.strip_prefix(PREFIX).ok_or_else(invalid)?.as_bytes();
    if suffix.is_empty() || !suffix.iter().all(u8::is_ascii_lowercase) {
        return Err(invalid());
    }

    let next = match *suffix {
        [b'z'] => "ba".to_string(),
        [c] => char::from(c + 1).to_string(),
        [b'c', b'z'] => {
            return Err(PlatformError::InvalidDevice(format!(
                "no device name after {last}"
            )));
        }
        [first, b'z'] => format!("{}a", char::from(first + 1)),
        [first, second] => format!("{}{}", char::from(first), char::from(second + 1)),
        _ => return Err(invalid()),
    };
    Ok(format!("{PREFIX}{next}"))
}
