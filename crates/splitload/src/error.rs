use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::numbering::{FragmentKind, FragmentNumber, SplitPointId};

/// Why a download stopped before its completion callback fired.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    #[default]
    Terminated,
}

impl InterruptReason {
    pub fn as_str(self) -> &'static str {
        match self {
            InterruptReason::Terminated => "terminated",
        }
    }
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterruptReason {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "terminated" => Ok(InterruptReason::Terminated),
            other => Err(LoaderError::UnknownInterruptReason(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("download of fragment {fragment} interrupted: {reason}")]
pub struct DownloadError {
    pub fragment: FragmentNumber,
    pub reason: InterruptReason,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LoaderError {
    #[error("split point {split_point} is not in 1..{num_entries}")]
    UnknownSplitPoint {
        split_point: SplitPointId,
        num_entries: u32,
    },

    #[error("fragment {fragment} does not exist for num_entries={num_entries}")]
    UnknownFragment {
        fragment: FragmentNumber,
        num_entries: u32,
    },

    #[error("invalid interrupt reason {0:?} (expected: terminated)")]
    UnknownInterruptReason(String),

    #[error("invalid fragment manifest: {0}")]
    InvalidManifest(String),

    #[error("loader service has stopped")]
    ServiceStopped,

    #[error("blocking loader call made from the loader service thread")]
    CalledFromServiceThread,
}

/// A failed download, as reported back to the code waiting on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFailure {
    pub error: DownloadError,
    pub kind: FragmentKind,
    /// Split points that will not load, in the order they were requested.
    pub affected: Vec<SplitPointId>,
    /// True when the loader is now stuck until `reset_on_failure` runs.
    pub stalled: bool,
}
