//! Network identity resolution.
//!
//! The logger keeps one log file per network, so every cycle starts by asking
//! the host which network it is on. Resolution shells out to the platform's
//! wireless tooling and fails explicitly (never guesses) when there is no
//! active connection. Nothing is cached: a roaming host may change networks
//! between two calls.

mod platform;

pub use platform::{Platform, parse_airport, parse_iwgetid, parse_netsh};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Errors raised while resolving the network identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("network identity resolution is not supported on {0}")]
    UnsupportedPlatform(String),

    #[error("unable to resolve network identity: {0}")]
    ResolutionFailed(String),
}

/// Logical name of the current network (for example a Wi-Fi SSID).
///
/// Only used as a grouping key for log file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NetworkIdentity(String);

impl NetworkIdentity {
    /// Wrap a non-empty identity string.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentityError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(IdentityError::ResolutionFailed(
                "no active network connection".to_string(),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of the current network identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self) -> Result<NetworkIdentity, IdentityError>;
}

/// Resolver backed by the host platform's network tooling.
#[derive(Debug, Clone, Copy)]
pub struct SystemResolver {
    platform: Platform,
}

impl SystemResolver {
    /// Resolver for the platform this binary runs on.
    ///
    /// Fails with [`IdentityError::UnsupportedPlatform`] on anything other than
    /// Linux, macOS and Windows.
    pub fn for_current_platform() -> Result<Self, IdentityError> {
        let platform = Platform::current()
            .ok_or_else(|| IdentityError::UnsupportedPlatform(std::env::consts::OS.to_string()))?;
        Ok(Self { platform })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }
}

#[async_trait]
impl IdentityResolver for SystemResolver {
    async fn resolve(&self) -> Result<NetworkIdentity, IdentityError> {
        let (program, args) = self.platform.query_command();
        let stdout = process_utils::capture_stdout(program, args)
            .await
            .map_err(|e| IdentityError::ResolutionFailed(e.to_string()))?;

        let identity = self.platform.parse(&stdout)?;
        debug!(platform = ?self.platform, identity = %identity, "Resolved network identity");
        Ok(identity)
    }
}
