use std::fs;
use std::path::Path;

use speedlog_engine::config::{ConfigLocation, Settings, discover_config};
use speedlog_engine::{
    SchedulerLoop, SpeedtestConfig, SpeedtestProvider, StopListener, SystemResolver,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;

pub async fn run(config: Option<&Path>, dir: &Path) -> Result<()> {
    let pointer = ConfigLocation::default_pointer_path();
    let config_path = discover_config(config, pointer.as_deref(), &std::env::current_dir()?)?;
    let settings = Settings::load(&config_path)?.validate()?;
    info!(config = %config_path.display(), "Using configuration");

    let resolver = SystemResolver::for_current_platform()?;
    let provider = SpeedtestProvider::new(SpeedtestConfig::default())?;
    fs::create_dir_all(dir)?;

    let token = CancellationToken::new();
    let listener = StopListener::on_stdin(token.clone())?;
    spawn_ctrl_c_handler(token.clone());

    let mut scheduler = SchedulerLoop::new(settings, resolver, provider, token.clone()).with_log_dir(dir);
    let report = scheduler.run().await;

    println!(
        "Stopped after {} cycle(s), {} record(s) logged.",
        report.cycles_completed, report.records_flushed
    );

    // A listener still blocked on stdin (stopped via Ctrl-C) ends with the process.
    if listener.is_finished() {
        debug!(exit = ?listener.join(), "Stop listener finished");
    }
    Ok(())
}

fn spawn_ctrl_c_handler(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("Ctrl-C received, stopping");
                    token.cancel();
                }
            }
        }
    });
}
