use std::sync::atomic::{AtomicBool, Ordering};

use crate::catalog::Catalog;
use crate::config::BurrowConfig;
use crate::error::{BurrowError, Result};

/// Return `Err(BurrowError::Interrupted)` if the shutdown flag is set.
pub fn check_interrupted(shutdown: Option<&AtomicBool>) -> Result<()> {
    if shutdown.is_some_and(|f| f.load(Ordering::Relaxed)) {
        return Err(BurrowError::Interrupted);
    }
    Ok(())
}

/// Open the catalog of the chosen (or configured) instance.
pub fn open_catalog(config: &BurrowConfig, instance: Option<&str>) -> Result<Catalog> {
    Catalog::open(&config.backup_dir, config.instance_name(instance)?)
}
