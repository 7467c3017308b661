use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use splitload_contracts::{REPLAY_REPORT_SCHEMA_VERSION, REPLAY_SCRIPT_SCHEMA_VERSION};

use crate::error::{InterruptReason, LoadFailure};
use crate::loader::{FragmentLoader, LoaderSnapshot};
use crate::manifest::FragmentManifest;
use crate::metrics::{zero_clock, MetricsEmitter, RecordingEmitter, StatsEvent};
use crate::numbering::{FragmentNumber, SplitPointId};
use crate::transport::RecordingTransport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplayStep {
    Inject {
        split_point: SplitPointId,
    },
    FragmentLoaded {
        split_point: SplitPointId,
    },
    LeftoversLoaded,
    FragmentFailed {
        fragment: FragmentNumber,
        #[serde(default)]
        reason: InterruptReason,
    },
    ResetOnFailure,
}

impl ReplayStep {
    pub fn op(&self) -> &'static str {
        match self {
            ReplayStep::Inject { .. } => "inject",
            ReplayStep::FragmentLoaded { .. } => "fragment_loaded",
            ReplayStep::LeftoversLoaded => "leftovers_loaded",
            ReplayStep::FragmentFailed { .. } => "fragment_failed",
            ReplayStep::ResetOnFailure => "reset_on_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayScript {
    pub schema_version: String,
    #[serde(default)]
    pub steps: Vec<ReplayStep>,
}

impl ReplayScript {
    pub fn new(steps: Vec<ReplayStep>) -> Self {
        Self {
            schema_version: REPLAY_SCRIPT_SCHEMA_VERSION.to_string(),
            steps,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let script: ReplayScript =
            serde_json::from_slice(bytes).context("parse replay script JSON")?;
        if script.schema_version != REPLAY_SCRIPT_SCHEMA_VERSION {
            anyhow::bail!(
                "replay script schema_version mismatch: expected {REPLAY_SCRIPT_SCHEMA_VERSION:?} got {:?}",
                script.schema_version
            );
        }
        Ok(script)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read replay script: {}", path.display()))?;
        Self::from_slice(&bytes).with_context(|| format!("load replay script: {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub op: String,
    pub requests: Vec<FragmentNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<LoadFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abandoned: Option<Vec<SplitPointId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub schema_version: String,
    pub module_name: String,
    pub num_entries: u32,
    pub steps: Vec<StepRecord>,
    pub requests: Vec<FragmentNumber>,
    pub events: Vec<StatsEvent>,
    pub final_state: LoaderSnapshot,
}

pub fn replay(manifest: &FragmentManifest, script: &ReplayScript) -> Result<ReplayReport> {
    replay_with(manifest, script, Vec::new())
}

/// Like `replay`, also forwarding every stats event to `extra`.
pub fn replay_with(
    manifest: &FragmentManifest,
    script: &ReplayScript,
    extra: Vec<Box<dyn MetricsEmitter + Send>>,
) -> Result<ReplayReport> {
    let transport = RecordingTransport::new();
    let recorder = RecordingEmitter::new();

    let mut emitters: Vec<Box<dyn MetricsEmitter + Send>> = vec![Box::new(recorder.clone())];
    emitters.extend(extra);

    let mut loader = FragmentLoader::new(manifest, transport.clone())
        .context("construct fragment loader")?
        .with_metrics(Box::new(emitters))
        .with_clock(zero_clock);

    let mut steps = Vec::with_capacity(script.steps.len());
    for (index, step) in script.steps.iter().enumerate() {
        let seen = transport.len();
        let mut record = StepRecord {
            index,
            op: step.op().to_string(),
            requests: Vec::new(),
            failure: None,
            abandoned: None,
        };

        let outcome = match *step {
            ReplayStep::Inject { split_point } => loader.inject(split_point),
            ReplayStep::FragmentLoaded { split_point } => loader.fragment_has_loaded(split_point),
            ReplayStep::LeftoversLoaded => {
                loader.leftovers_fragment_has_loaded();
                Ok(())
            }
            ReplayStep::FragmentFailed { fragment, reason } => loader
                .fragment_load_failed(fragment, reason)
                .map(|failure| record.failure = Some(failure)),
            ReplayStep::ResetOnFailure => {
                record.abandoned = Some(loader.reset_on_failure());
                Ok(())
            }
        };
        outcome.with_context(|| format!("replay step {index} ({})", step.op()))?;

        record.requests = transport.requests().split_off(seen);
        steps.push(record);
    }

    Ok(ReplayReport {
        schema_version: REPLAY_REPORT_SCHEMA_VERSION.to_string(),
        module_name: manifest.module_name.clone(),
        num_entries: manifest.num_entries,
        steps,
        requests: transport.requests(),
        events: recorder.events(),
        final_state: loader.snapshot(),
    })
}
