//! Deterministic crash injection for the merge protocol.
//!
//! A fail point is armed with a count of matching hits to let through; the
//! next hit fails with [`BurrowError::Interrupted`] and disarms it. No cleanup
//! runs after the failure, so the catalog is left as a killed process would
//! leave it.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{BurrowError, Result};

/// All participants have been marked MERGING.
pub const MERGE_START_STATUS: &str = "merge.start_status";
/// A file of the merged output has been written.
pub const MERGE_COPY_FILE: &str = "merge.copy_file";
/// The merged file list is staged but not yet renamed.
pub const MERGE_WRITE_FILELIST: &str = "merge.write_filelist";
/// The target is an OK FULL backup; absorbed members are not yet reclaimed.
pub const MERGE_PUBLISH: &str = "merge.publish";
/// One absorbed member has been marked MERGED; its storage still exists.
pub const MERGE_RECLAIM: &str = "merge.reclaim";

#[derive(Debug, Default)]
pub struct FailPoints {
    armed: Mutex<HashMap<String, u64>>,
    fired: Mutex<Vec<String>>,
}

impl FailPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the hit of `name` that follows `after` successful hits.
    pub fn arm(&self, name: &str, after: u64) {
        if let Ok(mut armed) = self.armed.lock() {
            armed.insert(name.to_string(), after);
        }
    }

    #[cfg(test)]
    pub fn disarm_all(&self) {
        if let Ok(mut armed) = self.armed.lock() {
            armed.clear();
        }
    }

    /// Names of the points that have fired, in order.
    pub fn fired(&self) -> Vec<String> {
        self.fired.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn check(&self, name: &str) -> Result<()> {
        let Ok(mut armed) = self.armed.lock() else {
            return Ok(());
        };
        let Some(remaining) = armed.get_mut(name) else {
            return Ok(());
        };
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(());
        }
        armed.remove(name);
        drop(armed);
        debug!(failpoint = name, "fail point triggered");
        if let Ok(mut fired) = self.fired.lock() {
            fired.push(name.to_string());
        }
        Err(BurrowError::Interrupted)
    }
}

/// Check an optional set of fail points.
pub(crate) fn hit(points: Option<&FailPoints>, name: &str) -> Result<()> {
    match points {
        Some(points) => points.check(name),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_after_count() {
        let fp = FailPoints::new();
        fp.arm(MERGE_COPY_FILE, 2);
        assert!(fp.check(MERGE_COPY_FILE).is_ok());
        assert!(fp.check(MERGE_COPY_FILE).is_ok());
        assert!(matches!(
            fp.check(MERGE_COPY_FILE),
            Err(BurrowError::Interrupted)
        ));
        assert!(fp.check(MERGE_COPY_FILE).is_ok());
        assert_eq!(fp.fired(), vec![MERGE_COPY_FILE.to_string()]);
    }

    #[test]
    fn unarmed_points_pass() {
        let fp = FailPoints::new();
        fp.arm(MERGE_PUBLISH, 0);
        assert!(fp.check(MERGE_RECLAIM).is_ok());
        assert!(hit(None, MERGE_PUBLISH).is_ok());
        fp.disarm_all();
        assert!(fp.check(MERGE_PUBLISH).is_ok());
    }
}
