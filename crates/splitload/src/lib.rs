//! Deferred code-fragment loading for split programs.
//!
//! A program split at build time ships an initial fragment plus, per split
//! point, an exclusive fragment, a base fragment and a leftovers fragment.
//! [`FragmentLoader`] decides which of those to download when a split point is
//! reached, and in what order.

pub mod error;
pub mod loader;
pub mod manifest;
pub mod metrics;
pub mod numbering;
pub mod replay;
pub mod service;
pub mod transport;

pub use error::{DownloadError, InterruptReason, LoadFailure, LoaderError};
pub use loader::{FragmentLoader, LoaderSnapshot, LoaderState};
pub use manifest::FragmentManifest;
pub use metrics::{
    EmitterKind, EventPhase, JsonLinesEmitter, MetricsEmitter, RecordingEmitter, StatsEvent,
    TracingEmitter,
};
pub use numbering::{FragmentKind, FragmentNumber, Numbering, NumberingTable, SplitPointId};
pub use replay::{replay, replay_with, ReplayReport, ReplayScript, ReplayStep};
pub use service::{LoaderHandle, LoaderService};
pub use transport::{FragmentTransport, RecordingTransport};
