//! Command-line interface for fieldscribe
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Field-recording ingestion and Norwegian transcription
#[derive(Parser, Debug)]
#[command(
    name = "fieldscribe",
    version,
    about = "Sync, convert and transcribe Norwegian field recordings"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// NB-Whisper model override (e.g. small, nb-whisper-medium)
    #[arg(long, global = true, value_name = "MODEL")]
    pub model: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile the remote drop folder and download missing recordings
    Sync {
        /// Only report what would be downloaded
        #[arg(long)]
        dry_run: bool,
    },

    /// Convert downloaded recordings to 16 kHz mono WAV
    Convert {
        /// File id to convert
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<String>,

        /// Convert every downloaded recording
        #[arg(long)]
        all: bool,
    },

    /// Transcribe a converted recording
    Transcribe {
        /// File id
        id: String,
    },

    /// Convert (if needed) and transcribe one recording
    Process {
        /// File id
        id: String,
    },

    /// Show processing status for one or all recordings
    Status {
        /// File id (default: all)
        id: Option<String>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a stored transcript
    Transcript {
        /// File id
        id: String,

        /// Print the full transcript record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resume a failed recording at the stage that failed
    Retry {
        /// File id
        id: String,
    },

    /// Discard a transcript and transcribe the recording again
    Retranscribe {
        /// File id
        id: String,
    },

    /// Storage usage, conversion ratio and stage counts
    Stats {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Check decoder, model, storage and remote configuration
    Check,

    /// Manage NB-Whisper models
    Models {
        /// Action to perform
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Full pass: sync, convert everything, transcribe everything pending
    Run,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Model management actions
#[derive(Subcommand, Debug)]
pub enum ModelsAction {
    /// List available models
    List,
    /// Download and install a model
    Install {
        /// Model name (e.g., small, nb-whisper-medium)
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_is_required() {
        let err = Cli::try_parse_from(["fieldscribe"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn test_parse_sync() {
        let cli = Cli::try_parse_from(["fieldscribe", "sync"]).unwrap();
        assert!(matches!(cli.command, Commands::Sync { dry_run: false }));
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::try_parse_from(["fieldscribe", "sync", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Commands::Sync { dry_run: true }));
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["fieldscribe", "-vv", "check"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_convert_id() {
        let cli = Cli::try_parse_from(["fieldscribe", "convert", "rec-1"]).unwrap();
        match cli.command {
            Commands::Convert { id, all } => {
                assert_eq!(id.as_deref(), Some("rec-1"));
                assert!(!all);
            }
            other => panic!("Expected Convert, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_convert_all() {
        let cli = Cli::try_parse_from(["fieldscribe", "convert", "--all"]).unwrap();
        assert!(matches!(cli.command, Commands::Convert { id: None, all: true }));
    }

    #[test]
    fn test_convert_needs_id_or_all() {
        assert!(Cli::try_parse_from(["fieldscribe", "convert"]).is_err());
        assert!(Cli::try_parse_from(["fieldscribe", "convert", "rec-1", "--all"]).is_err());
    }

    #[test]
    fn test_parse_transcript_json() {
        let cli = Cli::try_parse_from(["fieldscribe", "transcript", "rec-1", "--json"]).unwrap();
        match cli.command {
            Commands::Transcript { id, json } => {
                assert_eq!(id, "rec-1");
                assert!(json);
            }
            other => panic!("Expected Transcript, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_status_all() {
        let cli = Cli::try_parse_from(["fieldscribe", "status"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { id: None, json: false }));
    }

    #[test]
    fn test_transcribe_requires_id() {
        let err = Cli::try_parse_from(["fieldscribe", "transcribe"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_parse_models_install() {
        let cli = Cli::try_parse_from(["fieldscribe", "models", "install", "small"]).unwrap();
        match cli.command {
            Commands::Models {
                action: ModelsAction::Install { name },
            } => assert_eq!(name, "small"),
            other => panic!("Expected models install, got {other:?}"),
        }
    }

    #[test]
    fn test_global_options_after_command() {
        let cli = Cli::try_parse_from([
            "fieldscribe",
            "run",
            "--config",
            "/tmp/config.toml",
            "--model",
            "medium",
            "-q",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Run));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.toml")));
        assert_eq!(cli.model.as_deref(), Some("medium"));
        assert!(cli.quiet);
    }

    #[test]
    fn test_invalid_command_returns_error() {
        let err = Cli::try_parse_from(["fieldscribe", "record"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn test_version_flag() {
        let err = Cli::try_parse_from(["fieldscribe", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["fieldscribe", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }
}
