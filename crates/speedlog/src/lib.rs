//! Periodic internet speed logging.
//!
//! A [`SchedulerLoop`] measures throughput at a fixed interval and appends the
//! results to one [`DataStore`] per network, named after the host and the
//! network identity. The loop stops cooperatively when its
//! [`CancellationToken`](tokio_util::sync::CancellationToken) is cancelled,
//! typically by a [`StopListener`].

pub mod config;
pub mod error;
pub mod identity;
pub mod naming;
pub mod provider;
pub mod scheduler;
pub mod shutdown;
pub mod store;

pub use config::{ConfigError, LoopSettings, Settings};
pub use error::{Error, Result};
pub use identity::{IdentityError, IdentityResolver, NetworkIdentity, SystemResolver};
pub use provider::{MeasurementProvider, ProviderError, SpeedtestConfig, SpeedtestProvider};
pub use scheduler::{LoopReport, LoopState, SchedulerLoop};
pub use shutdown::{ListenerExit, StopListener};
pub use store::{DataStore, MeasurementRecord, StoreError};
