use burrow_core::backup::BackupId;
use burrow_core::commands;
use burrow_core::config::BurrowConfig;

use crate::format::{format_bytes, format_time};

pub(crate) fn run_show(
    config: &BurrowConfig,
    instance: Option<&str>,
    backup_id: Option<BackupId>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = commands::show::run(config, instance, backup_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No backups found.");
        return Ok(());
    }

    println!(
        "{:<14} {:<6} {:<9} {:<14} {:<20} {:>6} {:>12}",
        "ID", "Mode", "Status", "Parent", "Recovery time", "Files", "Data"
    );
    for row in &rows {
        let meta = &row.meta;
        let parent = meta
            .parent_id
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        let files = row
            .file_count
            .map_or_else(|| "?".to_string(), |n| n.to_string());
        let status = if row.expired {
            format!("{}*", meta.status)
        } else {
            meta.status.to_string()
        };
        println!(
            "{:<14} {:<6} {:<9} {:<14} {:<20} {:>6} {:>12}",
            meta.id.to_string(),
            meta.mode.to_string(),
            status,
            parent,
            format_time(&meta.recovery_time()),
            files,
            format_bytes(meta.data_bytes),
        );
    }
    if rows.iter().any(|r| r.expired) {
        println!();
        println!("* outside the retention window");
    }
    Ok(())
}
