mod cli;
mod commands;
mod error;
mod logging;

use crate::{
    cli::{Args, Commands},
    error::Result,
    logging::init_logging,
};
use clap::{CommandFactory, Parser, error::ErrorKind};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Usage errors exit with 1 rather than clap's default of 2.
            let _ = e.print();
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            process::exit(code);
        }
    };

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let Some(command) = args.command else {
        Args::command().print_help()?;
        println!();
        return Ok(());
    };

    init_logging(args.verbose, args.quiet)?;

    match command {
        Commands::Configure { new_file, location } => {
            commands::configure::run(new_file, location.as_deref())
        }
        Commands::Log { config, dir } => commands::log::run(config.as_deref(), &dir).await,
        Commands::Plot { files, dir, json } => commands::plot::run(&files, &dir, json),
    }
}
