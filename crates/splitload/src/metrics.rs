use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use splitload_contracts::STATS_SUB_SYSTEM;

use crate::numbering::{FragmentNumber, SplitPointId};

pub const LEFTOVERS_DOWNLOAD_GROUP: &str = "leftoversDownload";

pub fn download_group(sp: SplitPointId) -> String {
    format!("download{sp}")
}

/// Milliseconds source stamped on each event.
pub type Clock = fn() -> u64;

pub fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn zero_clock() -> u64 {
    0
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    Begin,
    End,
}

impl EventPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            EventPhase::Begin => "begin",
            EventPhase::End => "end",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsEvent {
    pub module_name: String,
    pub sub_system: String,
    pub evt_group: String,
    pub millis: u64,
    pub phase: EventPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<FragmentNumber>,
}

pub trait MetricsEmitter {
    fn emit(&mut self, event: &StatsEvent);
}

impl MetricsEmitter for Vec<Box<dyn MetricsEmitter + Send>> {
    fn emit(&mut self, event: &StatsEvent) {
        for emitter in self.iter_mut() {
            emitter.emit(event);
        }
    }
}

/// Optional emitter plus the fields every event shares.
pub struct MetricsSink {
    emitter: Option<Box<dyn MetricsEmitter + Send>>,
    module_name: String,
    clock: Clock,
}

impl MetricsSink {
    pub fn disabled(module_name: impl Into<String>) -> Self {
        Self {
            emitter: None,
            module_name: module_name.into(),
            clock: system_clock,
        }
    }

    pub fn set_emitter(&mut self, emitter: Box<dyn MetricsEmitter + Send>) {
        self.emitter = Some(emitter);
    }

    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    pub fn is_enabled(&self) -> bool {
        self.emitter.is_some()
    }

    pub fn emit(&mut self, evt_group: &str, phase: EventPhase, fragment: Option<FragmentNumber>) {
        let Some(emitter) = self.emitter.as_mut() else {
            return;
        };
        let event = StatsEvent {
            module_name: self.module_name.clone(),
            sub_system: STATS_SUB_SYSTEM.to_string(),
            evt_group: evt_group.to_string(),
            millis: (self.clock)(),
            phase,
            fragment,
        };
        emitter.emit(&event);
    }
}

impl fmt::Debug for MetricsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsSink")
            .field("enabled", &self.is_enabled())
            .field("module_name", &self.module_name)
            .finish()
    }
}

/// Keeps every event in memory; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingEmitter {
    events: Arc<Mutex<Vec<StatsEvent>>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatsEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetricsEmitter for RecordingEmitter {
    fn emit(&mut self, event: &StatsEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesEmitter<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesEmitter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MetricsEmitter for JsonLinesEmitter<W> {
    fn emit(&mut self, event: &StatsEvent) {
        let res = serde_json::to_writer(&mut self.out, event)
            .map_err(std::io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"));
        if let Err(err) = res {
            tracing::warn!(evt_group = %event.evt_group, "dropping stats event: {err}");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmitter;

impl MetricsEmitter for TracingEmitter {
    fn emit(&mut self, event: &StatsEvent) {
        tracing::info!(
            module_name = %event.module_name,
            sub_system = %event.sub_system,
            evt_group = %event.evt_group,
            millis = event.millis,
            phase = event.phase.as_str(),
            fragment = event.fragment.map(|f| f.0),
            "stats event"
        );
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EmitterKind {
    #[default]
    None,
    Jsonl,
    Log,
}

impl EmitterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EmitterKind::None => "none",
            EmitterKind::Jsonl => "jsonl",
            EmitterKind::Log => "log",
        }
    }
}

impl fmt::Display for EmitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct EmitterKindParseError {
    value: String,
}

impl fmt::Display for EmitterKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid events sink {:?} (expected one of: none, jsonl, log)",
            self.value
        )
    }
}

impl std::error::Error for EmitterKindParseError {}

impl FromStr for EmitterKind {
    type Err = EmitterKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(EmitterKind::None),
            "jsonl" | "ndjson" => Ok(EmitterKind::Jsonl),
            "log" | "tracing" => Ok(EmitterKind::Log),
            _ => Err(EmitterKindParseError {
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(feature = "clap")]
impl clap::ValueEnum for EmitterKind {
    fn value_variants<'a>() -> &'a [Self] {
        const ALL: [EmitterKind; 3] = [EmitterKind::None, EmitterKind::Jsonl, EmitterKind::Log];
        &ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            EmitterKind::None => Some(clap::builder::PossibleValue::new("none").alias("off")),
            EmitterKind::Jsonl => Some(clap::builder::PossibleValue::new("jsonl").alias("ndjson")),
            EmitterKind::Log => Some(clap::builder::PossibleValue::new("log").alias("tracing")),
        }
    }
}
