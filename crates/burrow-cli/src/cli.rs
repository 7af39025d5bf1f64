use clap::{Parser, Subcommand};

use burrow_core::backup::{BackupId, BackupStatus};

#[derive(Parser)]
#[command(
    name = "burrow",
    version,
    about = "Merge, inspect and validate chains of database backups",
    after_help = "\
Configuration file lookup order:
  1. --config <path>             (explicit flag)
  2. $BURROW_CONFIG              (environment variable)
  3. ./burrow.yaml               (project)
  4. Platform user config dir + /burrow/config.yaml (e.g. ~/.config)
  5. /etc/burrow/config.yaml     (system)"
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides BURROW_CONFIG and default search)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Instance whose backups to operate on (overrides `instance` in the config)
    #[arg(short = 'I', long, global = true)]
    pub instance: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Fold a backup and its ancestors into a single FULL backup
    Merge {
        /// Backup to merge
        backup_id: BackupId,

        /// Worker threads (0 = all cores, overrides merge.threads)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Allow merging a backup outside the retention window
        #[arg(long)]
        merge_expired: bool,
    },

    /// List backups, or show one
    Show {
        backup_id: Option<BackupId>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Delete a backup and every backup that depends on it
    Delete { backup_id: BackupId },

    /// Rebuild every file of a backup and check it; damaged backups become CORRUPT
    Validate { backup_id: BackupId },

    /// Change the status of a backup by hand
    SetStatus {
        backup_id: BackupId,

        /// New status (OK, ERROR, CORRUPT, ...)
        status: BackupStatus,
    },

    /// Write a starter configuration file
    Config {
        /// Destination path (default: ./burrow.yaml)
        dest: Option<String>,
    },
}

impl Commands {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Commands::Merge { .. } => "merge",
            Commands::Show { .. } => "show",
            Commands::Delete { .. } => "delete",
            Commands::Validate { .. } => "validate",
            Commands::SetStatus { .. } => "set-status",
            Commands::Config { .. } => "config",
        }
    }
}
