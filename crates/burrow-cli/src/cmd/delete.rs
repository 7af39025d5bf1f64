use burrow_core::backup::BackupId;
use burrow_core::commands;
use burrow_core::config::BurrowConfig;

pub(crate) fn run_delete(
    config: &BurrowConfig,
    instance: Option<&str>,
    backup_id: BackupId,
) -> Result<(), Box<dyn std::error::Error>> {
    let stats = commands::delete::run(config, instance, backup_id)?;
    for id in &stats.deleted {
        println!("Deleted {id}");
    }
    Ok(())
}
