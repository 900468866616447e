//! Log file naming.
//!
//! Every (host, network) pair gets its own log file, named
//! `internet-speed-log-<host>-<network>.txt`. Both parts come from outside the
//! program (SSIDs may contain almost anything), so they are sanitized into
//! names that are valid on Windows, Linux and macOS.

use std::path::{Path, PathBuf};

use sysinfo::System;

use crate::identity::NetworkIdentity;

const LOG_FILE_PREFIX: &str = "internet-speed-log";
const LOG_FILE_EXTENSION: &str = "txt";

/// Used when the host name cannot be determined.
pub const UNKNOWN_HOST: &str = "unknown-host";

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitize one component of a file name.
///
/// Control characters and characters Windows rejects become `_` (runs
/// collapse to one), leading and trailing spaces and dots are trimmed,
/// reserved device names get a `_` prefix and an empty result becomes
/// `"unnamed"`. Other Unicode text is kept as is.
pub fn sanitize_component(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    let is_reserved = WINDOWS_RESERVED_NAMES
        .iter()
        .any(|reserved| upper == *reserved || upper.starts_with(&format!("{reserved}.")));
    if is_reserved {
        return format!("_{trimmed}");
    }

    trimmed.to_string()
}

/// This machine's host name, or [`UNKNOWN_HOST`].
pub fn host_name() -> String {
    System::host_name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

/// File name of the log for `host` on `network`.
pub fn log_file_name(host: &str, network: &NetworkIdentity) -> String {
    format!(
        "{LOG_FILE_PREFIX}-{}-{}.{LOG_FILE_EXTENSION}",
        sanitize_component(host),
        sanitize_component(network.as_str())
    )
}

/// Full path of the log for `host` on `network` inside `dir`.
pub fn log_file_path(dir: &Path, host: &str, network: &NetworkIdentity) -> PathBuf {
    dir.join(log_file_name(host, network))
}
