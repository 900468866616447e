use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use speedlog_engine::config::{
    ConfigLocation, DEFAULT_CONFIG_FILE_NAME, DEFAULT_CONFIG_TEXT, Settings,
};
use tracing::info;

use crate::cli::Args;
use crate::error::{AppError, Result};

pub fn run(new_file: bool, location: Option<&Path>) -> Result<()> {
    if !new_file && location.is_none() {
        let mut cmd = Args::command();
        if let Some(configure) = cmd.find_subcommand_mut("configure") {
            configure.print_help()?;
        }
        return Ok(());
    }

    if new_file {
        let path = std::env::current_dir()?.join(DEFAULT_CONFIG_FILE_NAME);
        write_default_config(&path)?;
        println!("Created configuration file {}", path.display());
    }

    if let Some(location) = location {
        let pointer = ConfigLocation::default_pointer_path().ok_or_else(|| {
            AppError::InvalidInput("no configuration directory on this platform".to_string())
        })?;
        let recorded = record_location(location, &pointer)?;
        println!("Using configuration file {}", recorded.display());
    }

    Ok(())
}

/// Write the default configuration to `path`, refusing to overwrite.
pub fn write_default_config(path: &Path) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => AppError::InvalidInput(format!(
                "{} already exists, not overwriting it",
                path.display()
            )),
            _ => AppError::Io(e),
        })?;
    file.write_all(DEFAULT_CONFIG_TEXT.as_bytes())?;
    info!(path = %path.display(), "Wrote default configuration");
    Ok(())
}

/// Validate the configuration at `config` and record its absolute path in
/// the pointer file.
pub fn record_location(config: &Path, pointer: &Path) -> Result<PathBuf> {
    let config_path = fs::canonicalize(config).map_err(|e| {
        AppError::InvalidInput(format!("cannot use {}: {e}", config.display()))
    })?;
    Settings::load(&config_path)?.validate()?;

    ConfigLocation {
        config_path: config_path.clone(),
    }
    .write(pointer)?;
    info!(config = %config_path.display(), pointer = %pointer.display(), "Recorded configuration location");
    Ok(config_path)
}
