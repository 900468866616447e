//! The measurement scheduling loop.
//!
//! Each cycle resolves the network identity, opens the log file for that
//! identity, measures `repeats` times, flushes the batch and sleeps one log
//! interval in cancellation-check ticks. When the identity cannot be resolved
//! after the configured number of attempts, the loop waits a full interval
//! and starts over.
//!
//! Cancellation is cooperative. The token is checked before every state
//! transition, between measurement repeats and throughout every sleep; an
//! in-flight resolve, measurement or flush runs to completion first. A batch
//! measured when the token is already cancelled is discarded, never written.

mod sleep;

pub use sleep::{SleepOutcome, sleep_in_ticks, sleep_or_cancel};

use std::fmt;
use std::path::PathBuf;

use chrono::Local;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LoopSettings;
use crate::identity::{IdentityResolver, NetworkIdentity};
use crate::naming;
use crate::provider::MeasurementProvider;
use crate::store::{DataStore, MeasurementRecord, StoreError};

/// Scheduler state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Idle,
    ResolvingIdentity,
    Connected,
    Disconnected,
    Measuring,
    Flushing,
    Sleeping,
    Terminated,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ResolvingIdentity => "resolving identity",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Measuring => "measuring",
            Self::Flushing => "flushing",
            Self::Sleeping => "sleeping",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Counters collected over one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopReport {
    /// Cycles whose batch was flushed to disk.
    pub cycles_completed: u64,
    pub records_flushed: u64,
    pub resolve_attempts: u64,
    /// Full-interval waits after running out of resolve attempts.
    pub disconnected_waits: u64,
    /// Batches dropped because of a measurement failure or a stop request.
    pub discarded_batches: u64,
}

/// The store for the identity currently being logged.
#[derive(Debug)]
struct ActiveStore {
    identity: NetworkIdentity,
    store: DataStore,
}

/// Drives resolve, measure, flush and sleep until cancelled.
pub struct SchedulerLoop<R, P> {
    settings: LoopSettings,
    resolver: R,
    provider: P,
    token: CancellationToken,
    log_dir: PathBuf,
    host: String,
    state: LoopState,
    active: Option<ActiveStore>,
    report: LoopReport,
}

impl<R, P> SchedulerLoop<R, P>
where
    R: IdentityResolver,
    P: MeasurementProvider,
{
    pub fn new(settings: LoopSettings, resolver: R, provider: P, token: CancellationToken) -> Self {
        Self {
            settings,
            resolver,
            provider,
            token,
            log_dir: PathBuf::from("."),
            host: naming::host_name(),
            state: LoopState::Idle,
            active: None,
            report: LoopReport::default(),
        }
    }

    /// Directory log files are created in. Defaults to the working directory.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Host name used in log file names. Defaults to this machine's name.
    pub fn with_host_name(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn report(&self) -> LoopReport {
        self.report
    }

    /// Run until the token is cancelled.
    pub async fn run(&mut self) -> LoopReport {
        info!(
            log_dir = %self.log_dir.display(),
            host = %self.host,
            interval_secs = self.settings.log_interval().as_secs(),
            repeats = self.settings.repeats(),
            "Speed logger started"
        );

        while !self.token.is_cancelled() {
            self.transition(LoopState::ResolvingIdentity);
            let Some(identity) = self.resolve_identity().await else {
                if self.token.is_cancelled() {
                    break;
                }
                self.transition(LoopState::Disconnected);
                self.report.disconnected_waits += 1;
                warn!(
                    wait_secs = self.settings.log_interval().as_secs(),
                    "No network connection, waiting one log interval"
                );
                if sleep_or_cancel(self.settings.log_interval(), &self.token)
                    .await
                    .is_cancelled()
                {
                    break;
                }
                continue;
            };

            if self.token.is_cancelled() {
                break;
            }
            self.transition(LoopState::Connected);
            match self.activate_store(&identity) {
                Ok(()) => self.measure_and_flush().await,
                Err(e) => error!(identity = %identity, error = %e, "Cannot open log file, skipping cycle"),
            }

            if self.token.is_cancelled() {
                break;
            }
            self.transition(LoopState::Sleeping);
            let outcome = sleep_in_ticks(
                self.settings.ticks_per_interval(),
                self.settings.tick(),
                &self.token,
            )
            .await;
            if outcome.is_cancelled() {
                break;
            }
        }

        self.transition(LoopState::Terminated);
        info!(report = ?self.report, "Speed logger stopped");
        self.report
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = %self.state, to = %next, "Scheduler state change");
        self.state = next;
    }

    /// Try to resolve the identity up to `max_resolve_attempts` times,
    /// sleeping the retry interval between attempts.
    async fn resolve_identity(&mut self) -> Option<NetworkIdentity> {
        let max_attempts = self.settings.max_resolve_attempts();

        for attempt in 1..=max_attempts {
            if self.token.is_cancelled() {
                return None;
            }

            self.report.resolve_attempts += 1;
            match self.resolver.resolve().await {
                Ok(identity) => return Some(identity),
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Network identity unavailable");
                    if attempt < max_attempts
                        && sleep_or_cancel(self.settings.resolve_retry_interval(), &self.token)
                            .await
                            .is_cancelled()
                    {
                        return None;
                    }
                }
            }
        }
        None
    }

    /// Make sure the store for `identity` is the active one. The current
    /// store is kept while the identity is unchanged.
    fn activate_store(&mut self, identity: &NetworkIdentity) -> Result<(), StoreError> {
        if self
            .active
            .as_ref()
            .is_some_and(|active| active.identity == *identity)
        {
            return Ok(());
        }

        let path = naming::log_file_path(&self.log_dir, &self.host, identity);
        let store = if path.exists() {
            let mut store = DataStore::open(&path)?;
            let existing = store.load()?;
            info!(identity = %identity, path = %path.display(), existing, "Resuming log file");
            store
        } else {
            let store = DataStore::new(&path)?;
            info!(identity = %identity, path = %path.display(), "Created log file");
            store
        };

        let previous = self.active.replace(ActiveStore {
            identity: identity.clone(),
            store,
        });
        if let Some(previous) = previous {
            let unflushed = previous.store.unflushed().len();
            if unflushed > 0 {
                warn!(
                    identity = %previous.identity,
                    unflushed,
                    "Network changed with unflushed records, dropping them"
                );
            }
            info!(from = %previous.identity, to = %identity, "Switched log file");
        }
        Ok(())
    }

    async fn measure_and_flush(&mut self) {
        self.transition(LoopState::Measuring);
        let records = match self.measure_batch().await {
            Ok(Some(records)) => records,
            Ok(None) => {
                info!("Stop requested during measurement, discarding batch");
                self.report.discarded_batches += 1;
                return;
            }
            Err(e) => {
                warn!(error = %e, "Measurement failed, retrying next interval");
                self.report.discarded_batches += 1;
                return;
            }
        };

        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.store.insert(records);

        if self.token.is_cancelled() {
            info!(
                pending = active.store.unflushed().len(),
                "Stop requested before flush, discarding batch"
            );
            self.report.discarded_batches += 1;
            return;
        }

        self.transition(LoopState::Flushing);
        self.flush();
    }

    /// Measure `repeats` times against one selected server. All records share
    /// the timestamp taken when the batch starts. `Ok(None)` means the token
    /// was cancelled between repeats.
    async fn measure_batch(&mut self) -> crate::Result<Option<Vec<MeasurementRecord>>> {
        let timestamp = Local::now().naive_local();
        let server = self.provider.select_server().await?;
        debug!(server_id = %server.id, server_url = %server.url, "Measuring");

        let repeats = self.settings.repeats();
        let mut records = Vec::with_capacity(repeats as usize);
        for repeat in 1..=repeats {
            if self.token.is_cancelled() {
                return Ok(None);
            }
            self.provider.measure_download().await?;
            self.provider.measure_upload().await?;
            let results = self.provider.results()?;
            debug!(
                repeat,
                repeats,
                ping = results.ping,
                download = results.download,
                upload = results.upload,
                "Measurement complete"
            );
            records.push(MeasurementRecord::new(
                timestamp,
                results.ping,
                results.download,
                results.upload,
                results.server.url,
                results.server.id,
            )?);
        }
        Ok(Some(records))
    }

    fn flush(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        match active.store.update() {
            Ok(written) => {
                self.report.cycles_completed += 1;
                self.report.records_flushed += written as u64;
                info!(
                    identity = %active.identity,
                    written,
                    total = active.store.len(),
                    "Logged speed measurements"
                );
            }
            Err(StoreError::NotFound { path }) => {
                warn!(
                    path = %path.display(),
                    lost = active.store.unflushed().len(),
                    "Log file disappeared, unflushed records lost; it will be recreated next cycle"
                );
                self.active = None;
            }
            Err(e) => {
                error!(
                    identity = %active.identity,
                    error = %e,
                    pending = active.store.unflushed().len(),
                    "Failed to write log file, will retry next cycle"
                );
            }
        }
    }
}
