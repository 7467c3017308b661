//! Shared, version-pinned document identifiers.
//!
//! Every machine-readable file that splitload reads or writes carries one of
//! these strings in its `schema_version` field. Bump the suffix whenever the
//! shape of the corresponding document changes.

pub const FRAGMENT_MANIFEST_SCHEMA_VERSION: &str = "splitload.manifest@0.1.0";
pub const REPLAY_SCRIPT_SCHEMA_VERSION: &str = "splitload.script@0.1.0";

pub const REPLAY_REPORT_SCHEMA_VERSION: &str = "splitload.replay.report@0.1.0";
pub const NUMBERING_REPORT_SCHEMA_VERSION: &str = "splitload.numbering.report@0.1.0";

/// Subsystem tag stamped on every stats event the loader emits.
pub const STATS_SUB_SYSTEM: &str = "runAsync";
