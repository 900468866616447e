use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use speedlog_engine::config::LoopSettings;
use speedlog_engine::identity::{IdentityError, IdentityResolver, NetworkIdentity};
use speedlog_engine::provider::{
    MeasurementProvider, MeasurementResults, ProviderError, ServerInfo,
};
use speedlog_engine::scheduler::{LoopState, SchedulerLoop};
use speedlog_engine::store::HEADER;

const HOST: &str = "testhost";

/// Resolver that replays a script, then repeats its last entry. Records the
/// virtual time of every call.
#[derive(Clone)]
struct ScriptedResolver {
    script: Arc<Mutex<VecDeque<Option<&'static str>>>>,
    calls: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedResolver {
    fn new(script: &[Option<&'static str>]) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.iter().copied().collect())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityResolver for ScriptedResolver {
    async fn resolve(&self) -> Result<NetworkIdentity, IdentityError> {
        self.calls.lock().unwrap().push(Instant::now());
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front().flatten()
        } else {
            script.front().copied().flatten()
        };
        match next {
            Some(name) => NetworkIdentity::new(name),
            None => Err(IdentityError::ResolutionFailed("not connected".to_string())),
        }
    }
}

/// Provider returning fixed numbers. Can fail the first selections and can
/// cancel a token in the middle of a measurement.
#[derive(Default)]
struct FakeProvider {
    failing_selections: u32,
    cancel_on_upload: Option<CancellationToken>,
    measured: bool,
    selections: Arc<Mutex<u32>>,
}

#[async_trait]
impl MeasurementProvider for FakeProvider {
    async fn select_server(&mut self) -> Result<ServerInfo, ProviderError> {
        *self.selections.lock().unwrap() += 1;
        self.measured = false;
        if self.failing_selections > 0 {
            self.failing_selections -= 1;
            return Err(ProviderError::NoServers);
        }
        Ok(server())
    }

    async fn measure_download(&mut self) -> Result<f64, ProviderError> {
        Ok(52_428_800.0)
    }

    async fn measure_upload(&mut self) -> Result<f64, ProviderError> {
        if let Some(token) = &self.cancel_on_upload {
            token.cancel();
        }
        self.measured = true;
        Ok(10_485_760.0)
    }

    fn results(&self) -> Result<MeasurementResults, ProviderError> {
        if !self.measured {
            return Err(ProviderError::NotReady("upload was measured"));
        }
        Ok(MeasurementResults {
            ping: 12.5,
            download: 52_428_800.0,
            upload: 10_485_760.0,
            server: server(),
        })
    }
}

fn server() -> ServerInfo {
    ServerInfo {
        url: "http://speed.example.net:8080/speedtest/upload.php".to_string(),
        id: "4242".to_string(),
    }
}

/// One minute interval in 5 second ticks, 30 second resolve retries.
fn settings(repeats: u32, retries: u32) -> LoopSettings {
    LoopSettings::new(
        Duration::from_secs(60),
        repeats,
        Duration::from_secs(5),
        retries,
        Duration::from_secs(30),
    )
    .unwrap()
}

fn cancel_after(token: &CancellationToken, after: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        token.cancel();
    });
}

fn log_path(dir: &Path, identity: &str) -> std::path::PathBuf {
    dir.join(format!("internet-speed-log-{HOST}-{identity}.txt"))
}

fn data_lines(path: &Path) -> Vec<String> {
    let content = fs::read_to_string(path).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some(HEADER));
    lines.map(str::to_string).collect()
}

#[tokio::test(start_paused = true)]
async fn test_cycle_writes_batch_with_shared_timestamp() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let resolver = ScriptedResolver::new(&[Some("HomeNet")]);

    let mut scheduler = SchedulerLoop::new(settings(3, 3), resolver, FakeProvider::default(), token.clone())
        .with_log_dir(dir.path())
        .with_host_name(HOST);

    cancel_after(&token, Duration::from_secs(30));
    let report = scheduler.run().await;

    assert_eq!(scheduler.state(), LoopState::Terminated);
    assert_eq!(report.cycles_completed, 1);
    assert_eq!(report.records_flushed, 3);

    let path = log_path(dir.path(), "HomeNet");
    let lines = data_lines(&path);
    assert_eq!(lines.len(), 3);

    let timestamps: Vec<&str> = lines.iter().map(|l| l.split(' ').next().unwrap()).collect();
    assert!(timestamps.iter().all(|t| *t == timestamps[0]));
    assert!(lines[0].ends_with(" 12.5 52428800.0 10485760.0 http://speed.example.net:8080/speedtest/upload.php 4242"));

    let backup = fs::read_to_string(dir.path().join("internet-speed-log-testhost-HomeNet.txt.old")).unwrap();
    assert_eq!(backup, format!("{HEADER}\n"));
}

#[tokio::test(start_paused = true)]
async fn test_cycles_are_one_interval_apart() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let resolver = ScriptedResolver::new(&[Some("HomeNet")]);
    let calls = resolver.clone();

    let mut scheduler = SchedulerLoop::new(settings(1, 3), resolver, FakeProvider::default(), token.clone())
        .with_log_dir(dir.path())
        .with_host_name(HOST);

    cancel_after(&token, Duration::from_secs(150));
    let report = scheduler.run().await;

    assert_eq!(report.cycles_completed, 3);
    assert_eq!(data_lines(&log_path(dir.path(), "HomeNet")).len(), 3);

    let times = calls.call_times();
    assert_eq!(times.len(), 3);
    assert_eq!((times[1] - times[0]).as_secs(), 60);
    assert_eq!((times[2] - times[1]).as_secs(), 60);
}

#[tokio::test(start_paused = true)]
async fn test_resolve_retries_are_bounded() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let resolver = ScriptedResolver::new(&[None]);
    let calls = resolver.clone();

    let mut scheduler = SchedulerLoop::new(settings(1, 3), resolver, FakeProvider::default(), token.clone())
        .with_log_dir(dir.path())
        .with_host_name(HOST);

    // Attempts at 0s, 30s and 60s, then a full 60s interval, then 120s.
    cancel_after(&token, Duration::from_secs(125));
    let report = scheduler.run().await;

    let start = calls.call_times()[0];
    let offsets: Vec<u64> = calls
        .call_times()
        .iter()
        .map(|t| (*t - start).as_secs())
        .collect();
    assert_eq!(offsets, vec![0, 30, 60, 120]);
    assert_eq!(report.resolve_attempts, 4);
    assert_eq!(report.disconnected_waits, 1);
    assert_eq!(report.cycles_completed, 0);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_failures() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let resolver = ScriptedResolver::new(&[None, Some("Office")]);

    let mut scheduler = SchedulerLoop::new(settings(1, 2), resolver, FakeProvider::default(), token.clone())
        .with_log_dir(dir.path())
        .with_host_name(HOST);

    cancel_after(&token, Duration::from_secs(40));
    let report = scheduler.run().await;

    assert_eq!(report.resolve_attempts, 2);
    assert_eq!(report.disconnected_waits, 0);
    assert_eq!(report.cycles_completed, 1);
    assert_eq!(data_lines(&log_path(dir.path(), "Office")).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_measurement_discards_batch() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let provider = FakeProvider {
        cancel_on_upload: Some(token.clone()),
        ..FakeProvider::default()
    };

    let mut scheduler = SchedulerLoop::new(
        settings(1, 3),
        ScriptedResolver::new(&[Some("HomeNet")]),
        provider,
        token.clone(),
    )
    .with_log_dir(dir.path())
    .with_host_name(HOST);

    let start = Instant::now();
    let report = scheduler.run().await;

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(scheduler.state(), LoopState::Terminated);
    assert_eq!(report.discarded_batches, 1);
    assert_eq!(report.records_flushed, 0);

    let path = log_path(dir.path(), "HomeNet");
    assert!(data_lines(&path).is_empty());
    assert!(!dir.path().join("internet-speed-log-testhost-HomeNet.txt.old").exists());
}

#[tokio::test(start_paused = true)]
async fn test_stop_between_repeats_discards_partial_batch() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let provider = FakeProvider {
        cancel_on_upload: Some(token.clone()),
        ..FakeProvider::default()
    };

    let mut scheduler = SchedulerLoop::new(
        settings(5, 3),
        ScriptedResolver::new(&[Some("HomeNet")]),
        provider,
        token.clone(),
    )
    .with_log_dir(dir.path())
    .with_host_name(HOST);

    let report = scheduler.run().await;

    assert_eq!(report.discarded_batches, 1);
    assert!(data_lines(&log_path(dir.path(), "HomeNet")).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_sleep_terminates_within_a_tick() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();

    let mut scheduler = SchedulerLoop::new(
        settings(1, 3),
        ScriptedResolver::new(&[Some("HomeNet")]),
        FakeProvider::default(),
        token.clone(),
    )
    .with_log_dir(dir.path())
    .with_host_name(HOST);

    let start = Instant::now();
    cancel_after(&token, Duration::from_secs(22));
    scheduler.run().await;

    assert!(start.elapsed() < Duration::from_secs(22 + 5));
    assert_eq!(scheduler.state(), LoopState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_measurement_failure_retried_next_interval() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let provider = FakeProvider {
        failing_selections: 1,
        ..FakeProvider::default()
    };
    let selections = provider.selections.clone();

    let mut scheduler = SchedulerLoop::new(
        settings(1, 3),
        ScriptedResolver::new(&[Some("HomeNet")]),
        provider,
        token.clone(),
    )
    .with_log_dir(dir.path())
    .with_host_name(HOST);

    cancel_after(&token, Duration::from_secs(90));
    let report = scheduler.run().await;

    assert_eq!(*selections.lock().unwrap(), 2);
    assert_eq!(report.discarded_batches, 1);
    assert_eq!(report.cycles_completed, 1);
    assert_eq!(data_lines(&log_path(dir.path(), "HomeNet")).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_identity_change_switches_file() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let resolver = ScriptedResolver::new(&[Some("HomeNet"), Some("Cafe/Guest"), Some("HomeNet")]);

    let mut scheduler = SchedulerLoop::new(settings(1, 3), resolver, FakeProvider::default(), token.clone())
        .with_log_dir(dir.path())
        .with_host_name(HOST);

    cancel_after(&token, Duration::from_secs(150));
    scheduler.run().await;

    assert_eq!(data_lines(&log_path(dir.path(), "HomeNet")).len(), 2);
    assert_eq!(data_lines(&log_path(dir.path(), "Cafe_Guest")).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resumes_existing_log() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path(), "HomeNet");
    let existing = "2024/01/02T03:04:05 9.0 100.0 50.0 http://old.example.net/upload.php 1\n";
    fs::write(&path, format!("{HEADER}\n{existing}")).unwrap();

    let token = CancellationToken::new();
    let mut scheduler = SchedulerLoop::new(
        settings(1, 3),
        ScriptedResolver::new(&[Some("HomeNet")]),
        FakeProvider::default(),
        token.clone(),
    )
    .with_log_dir(dir.path())
    .with_host_name(HOST);

    cancel_after(&token, Duration::from_secs(30));
    scheduler.run().await;

    let lines = data_lines(&path);
    assert_eq!(lines.len(), 2);
    assert_eq!(format!("{}\n", lines[0]), existing);
}

#[tokio::test(start_paused = true)]
async fn test_removed_log_file_is_recreated() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let path = log_path(dir.path(), "HomeNet");

    let mut scheduler = SchedulerLoop::new(
        settings(1, 3),
        ScriptedResolver::new(&[Some("HomeNet")]),
        FakeProvider::default(),
        token.clone(),
    )
    .with_log_dir(dir.path())
    .with_host_name(HOST);

    let removed = path.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        fs::remove_file(&removed).unwrap();
    });
    cancel_after(&token, Duration::from_secs(150));
    let report = scheduler.run().await;

    // Cycle at 60s finds the file gone; the cycle at 120s starts a new one.
    assert_eq!(report.cycles_completed, 2);
    assert_eq!(report.records_flushed, 2);
    assert_eq!(data_lines(&path).len(), 1);
}
