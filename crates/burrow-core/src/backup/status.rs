use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BurrowError;

/// Lifecycle state of a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackupStatus {
    Running,
    Ok,
    Error,
    Merging,
    Merged,
    Deleting,
    Deleted,
    Corrupt,
}

impl BackupStatus {
    pub const ALL: [BackupStatus; 8] = [
        BackupStatus::Running,
        BackupStatus::Ok,
        BackupStatus::Error,
        BackupStatus::Merging,
        BackupStatus::Merged,
        BackupStatus::Deleting,
        BackupStatus::Deleted,
        BackupStatus::Corrupt,
    ];

    /// Whether the catalog may move a backup from `self` to `next`.
    /// Re-asserting the current status is always allowed.
    pub fn can_transition_to(self, next: BackupStatus) -> bool {
        use BackupStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Running, Ok | Error | Corrupt)
                | (Ok, Merging | Deleting | Error | Corrupt)
                | (Error, Ok | Deleting)
                | (Merging, Ok | Merged | Corrupt)
                | (Merged, Deleting | Deleted)
                | (Deleting, Deleted)
                | (Corrupt, Deleting)
        )
    }

    /// Statuses a chain walk may pass through.
    pub fn is_resolvable(self) -> bool {
        matches!(self, BackupStatus::Ok | BackupStatus::Merging)
    }

    /// Backups in these states no longer hold anyone's chain together.
    pub fn is_leaving(self) -> bool {
        matches!(
            self,
            BackupStatus::Merged | BackupStatus::Deleting | BackupStatus::Deleted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackupStatus::Running => "RUNNING",
            BackupStatus::Ok => "OK",
            BackupStatus::Error => "ERROR",
            BackupStatus::Merging => "MERGING",
            BackupStatus::Merged => "MERGED",
            BackupStatus::Deleting => "DELETING",
            BackupStatus::Deleted => "DELETED",
            BackupStatus::Corrupt => "CORRUPT",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        BackupStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == upper)
            .ok_or_else(|| BurrowError::Other(format!("unknown backup status: '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::BackupStatus::*;
    use super::*;

    #[test]
    fn merge_lifecycle_is_legal() {
        assert!(Ok.can_transition_to(Merging));
        assert!(Merging.can_transition_to(Ok));
        assert!(Merging.can_transition_to(Merged));
        assert!(Merged.can_transition_to(Deleted));
    }

    #[test]
    fn no_way_back_from_terminal_states() {
        for st in BackupStatus::ALL {
            if st != Deleted {
                assert!(!Deleted.can_transition_to(st), "DELETED -> {st}");
            }
        }
        assert!(!Merged.can_transition_to(Ok));
        assert!(!Merged.can_transition_to(Merging));
    }

    #[test]
    fn error_backups_cannot_join_a_merge() {
        assert!(!Error.can_transition_to(Merging));
        assert!(!Running.can_transition_to(Merging));
        assert!(!Corrupt.can_transition_to(Ok));
    }

    #[test]
    fn same_status_is_noop() {
        for st in BackupStatus::ALL {
            assert!(st.can_transition_to(st));
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("merging".parse::<BackupStatus>().unwrap(), Merging);
        assert_eq!("OK".parse::<BackupStatus>().unwrap(), Ok);
        assert!("done".parse::<BackupStatus>().is_err());
    }
}
