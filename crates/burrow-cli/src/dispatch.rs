use burrow_core::config::BurrowConfig;

use crate::cli::Commands;
use crate::cmd;
use crate::signal::SHUTDOWN;

pub(crate) fn dispatch_command(
    command: &Commands,
    cfg: &BurrowConfig,
    instance: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Merge {
            backup_id,
            threads,
            merge_expired,
        } => cmd::merge::run_merge(cfg, instance, *backup_id, *threads, *merge_expired, &SHUTDOWN),
        Commands::Show { backup_id, json } => cmd::show::run_show(cfg, instance, *backup_id, *json),
        Commands::Delete { backup_id } => cmd::delete::run_delete(cfg, instance, *backup_id),
        Commands::Validate { backup_id } => cmd::validate::run_validate(cfg, instance, *backup_id),
        Commands::SetStatus { backup_id, status } => {
            cmd::set_status::run_set_status(cfg, instance, *backup_id, *status)
        }
        Commands::Config { .. } => Err("`config` is handled before configuration loading".into()),
    }
}
