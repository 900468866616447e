//! Speed measurement providers.
//!
//! The scheduler drives a provider through one server selection followed by
//! `repeats` download/upload pairs, reading [`MeasurementProvider::results`]
//! after each pair.

mod speedtest;

pub use speedtest::{SpeedtestConfig, SpeedtestProvider};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Provider failures. All of them are recoverable: the cycle is abandoned
/// and retried after the next interval.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no test servers available")]
    NoServers,

    #[error("invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("results requested before {0}")]
    NotReady(&'static str),
}

/// Identity of the server a measurement ran against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub url: String,
    pub id: String,
}

/// Results of the latest selection plus download/upload pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementResults {
    /// Round-trip latency in milliseconds.
    pub ping: f64,
    /// Bits per second.
    pub download: f64,
    /// Bits per second.
    pub upload: f64,
    pub server: ServerInfo,
}

/// A source of speed measurements.
#[async_trait]
pub trait MeasurementProvider: Send {
    /// Pick the test server for this cycle and measure its latency.
    async fn select_server(&mut self) -> Result<ServerInfo, ProviderError>;

    /// Measure download throughput against the selected server.
    async fn measure_download(&mut self) -> Result<f64, ProviderError>;

    /// Measure upload throughput against the selected server.
    async fn measure_upload(&mut self) -> Result<f64, ProviderError>;

    /// Latest results. Fails with [`ProviderError::NotReady`] until a server
    /// is selected and both directions have been measured.
    fn results(&self) -> Result<MeasurementResults, ProviderError>;
}
