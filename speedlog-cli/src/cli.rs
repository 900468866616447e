use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Periodically measure internet speed and log it per network.
#[derive(Parser, Debug)]
#[command(name = "internet-speed-log", version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or register a configuration file
    Configure {
        /// Write a default configuration file to the current directory
        #[arg(long)]
        new_file: bool,

        /// Record the configuration file `log` should use
        #[arg(long, value_name = "PATH")]
        location: Option<PathBuf>,
    },

    /// Measure and log internet speed until stopped
    Log {
        /// Configuration file (overrides the recorded location)
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Directory for log files
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },

    /// Show logged measurements
    Plot {
        /// Log files to show (default: every log file in --dir)
        files: Vec<PathBuf>,

        /// Directory searched when no files are given
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        dir: PathBuf,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_parses() {
        let args = Args::try_parse_from(["internet-speed-log"]).unwrap();
        assert!(args.command.is_none());
    }

    #[test]
    fn test_help_subcommand_is_display_help() {
        let err = Args::try_parse_from(["internet-speed-log", "help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        let err = Args::try_parse_from(["internet-speed-log", "graph"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn test_log_arguments() {
        let args =
            Args::try_parse_from(["internet-speed-log", "-v", "log", "--dir", "/tmp/logs"]).unwrap();
        assert!(args.verbose);
        match args.command {
            Some(Commands::Log { config, dir }) => {
                assert!(config.is_none());
                assert_eq!(dir, PathBuf::from("/tmp/logs"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_plot_files() {
        let args = Args::try_parse_from(["internet-speed-log", "plot", "a.txt", "b.txt", "--json"])
            .unwrap();
        match args.command {
            Some(Commands::Plot { files, json, .. }) => {
                assert_eq!(files.len(), 2);
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
