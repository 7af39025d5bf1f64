use burrow_core::backup::{BackupId, BackupStatus};
use burrow_core::commands;
use burrow_core::config::BurrowConfig;

pub(crate) fn run_set_status(
    config: &BurrowConfig,
    instance: Option<&str>,
    backup_id: BackupId,
    status: BackupStatus,
) -> Result<(), Box<dyn std::error::Error>> {
    let meta = commands::set_status::run(config, instance, backup_id, status)?;
    println!("Backup {} is now {}", meta.id, meta.status);
    Ok(())
}
