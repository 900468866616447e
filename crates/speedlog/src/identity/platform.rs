//! Per-platform network status queries and their output parsers.

use super::{IdentityError, NetworkIdentity};

const AIRPORT_PATH: &str =
    "/System/Library/PrivateFrameworks/Apple80211.framework/Versions/Current/Resources/airport";

/// Platform families with a known network status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    /// The platform this binary was built for, if supported.
    pub fn current() -> Option<Self> {
        Self::from_os(std::env::consts::OS)
    }

    /// Map a `std::env::consts::OS` value to a platform family.
    pub fn from_os(os: &str) -> Option<Self> {
        match os {
            "linux" => Some(Self::Linux),
            "macos" => Some(Self::MacOs),
            "windows" => Some(Self::Windows),
            _ => None,
        }
    }

    /// Program and arguments that print the current network status.
    pub(crate) fn query_command(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Linux => ("iwgetid", &["-r"]),
            Self::MacOs => (AIRPORT_PATH, &["-I"]),
            Self::Windows => ("netsh", &["wlan", "show", "interfaces"]),
        }
    }

    pub(crate) fn parse(self, stdout: &str) -> Result<NetworkIdentity, IdentityError> {
        match self {
            Self::Linux => parse_iwgetid(stdout),
            Self::MacOs => parse_airport(stdout),
            Self::Windows => parse_netsh(stdout),
        }
    }
}

/// `iwgetid -r` prints just the SSID.
pub fn parse_iwgetid(stdout: &str) -> Result<NetworkIdentity, IdentityError> {
    NetworkIdentity::new(stdout.trim())
}

/// `airport -I` prints `key: value` lines; the SSID line has key `SSID`
/// (distinct from `BSSID`).
pub fn parse_airport(stdout: &str) -> Result<NetworkIdentity, IdentityError> {
    keyed_value(stdout, "SSID")
        .ok_or_else(|| missing_field("airport"))
        .and_then(NetworkIdentity::new)
}

/// `netsh wlan show interfaces` prints aligned `Key : Value` lines.
pub fn parse_netsh(stdout: &str) -> Result<NetworkIdentity, IdentityError> {
    keyed_value(stdout, "SSID")
        .ok_or_else(|| missing_field("netsh"))
        .and_then(NetworkIdentity::new)
}

/// Value of the first `key: value` line whose trimmed key equals `key`.
/// Everything after the first colon is the value, so values may contain colons.
fn keyed_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        (k.trim() == key).then(|| v.trim())
    })
}

fn missing_field(tool: &str) -> IdentityError {
    IdentityError::ResolutionFailed(format!(
        "{tool} output has no SSID field (not connected to a wireless network?)"
    ))
}
