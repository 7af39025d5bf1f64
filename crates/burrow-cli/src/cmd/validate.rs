use burrow_core::backup::BackupId;
use burrow_core::commands;
use burrow_core::config::BurrowConfig;

pub(crate) fn run_validate(
    config: &BurrowConfig,
    instance: Option<&str>,
    backup_id: BackupId,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = commands::validate::run(config, instance, backup_id)?;
    match report.problem {
        None => {
            println!("Backup {backup_id} is valid ({} files)", report.files_checked);
            Ok(())
        }
        Some(problem) => Err(format!("backup {backup_id} is corrupt: {problem}").into()),
    }
}
