//! The deferred fragment loader.
//!
//! The first split point reached pays for its base fragment and then the
//! shared leftovers fragment. Requests that arrive while either is in flight
//! wait in a FIFO queue and are released, in arrival order, once leftovers are
//! installed. From then on every split point downloads only its exclusive
//! fragment.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DownloadError, InterruptReason, LoadFailure, LoaderError};
use crate::manifest::FragmentManifest;
use crate::metrics::{
    download_group, Clock, EventPhase, MetricsEmitter, MetricsSink, LEFTOVERS_DOWNLOAD_GROUP,
};
use crate::numbering::{FragmentKind, FragmentNumber, Numbering, SplitPointId};
use crate::transport::FragmentTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoaderState {
    Cold,
    BaseLoading,
    LeftoversLoading,
    Steady,
    /// Base installed, leftovers abandoned by `reset_on_failure`.
    AwaitingLeftovers,
}

impl LoaderState {
    pub fn as_str(self) -> &'static str {
        match self {
            LoaderState::Cold => "cold",
            LoaderState::BaseLoading => "base-loading",
            LoaderState::LeftoversLoading => "leftovers-loading",
            LoaderState::Steady => "steady",
            LoaderState::AwaitingLeftovers => "awaiting-leftovers",
        }
    }
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderSnapshot {
    pub state: LoaderState,
    pub num_entries: u32,
    pub base: Option<SplitPointId>,
    pub pending: Vec<SplitPointId>,
}

pub struct FragmentLoader<T: FragmentTransport> {
    numbering: Numbering,
    transport: T,
    metrics: MetricsSink,

    base: Option<SplitPointId>,
    // Split point whose base fragment is in flight; cleared once `base` is set.
    base_request: Option<SplitPointId>,
    base_loading: bool,
    leftovers_loading: bool,
    leftovers_loaded: bool,
    pending: VecDeque<SplitPointId>,
}

impl<T: FragmentTransport> FragmentLoader<T> {
    pub fn new(manifest: &FragmentManifest, transport: T) -> Result<Self, LoaderError> {
        manifest.validate()?;
        Ok(Self {
            numbering: manifest.numbering(),
            transport,
            metrics: MetricsSink::disabled(manifest.module_name.clone()),
            base: None,
            base_request: None,
            base_loading: false,
            leftovers_loading: false,
            leftovers_loaded: false,
            pending: VecDeque::new(),
        })
    }

    pub fn with_metrics(mut self, emitter: Box<dyn MetricsEmitter + Send>) -> Self {
        self.metrics.set_emitter(emitter);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.metrics.set_clock(clock);
        self
    }

    pub fn state(&self) -> LoaderState {
        if self.leftovers_loaded {
            LoaderState::Steady
        } else if self.leftovers_loading {
            LoaderState::LeftoversLoading
        } else if self.base_loading {
            LoaderState::BaseLoading
        } else if self.base.is_some() {
            LoaderState::AwaitingLeftovers
        } else {
            LoaderState::Cold
        }
    }

    pub fn base(&self) -> Option<SplitPointId> {
        self.base
    }

    pub fn pending(&self) -> impl Iterator<Item = SplitPointId> + '_ {
        self.pending.iter().copied()
    }

    pub fn numbering(&self) -> Numbering {
        self.numbering
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// The leftovers fragment for this run, once the base is known.
    pub fn leftovers_fragment(&self) -> Option<FragmentNumber> {
        self.base.map(|b| self.numbering.leftovers_fragment(b))
    }

    pub fn snapshot(&self) -> LoaderSnapshot {
        LoaderSnapshot {
            state: self.state(),
            num_entries: self.numbering.num_entries(),
            base: self.base,
            pending: self.pending.iter().copied().collect(),
        }
    }

    fn check_split_point(&self, sp: SplitPointId) -> Result<(), LoaderError> {
        if self.numbering.contains(sp) {
            Ok(())
        } else {
            Err(LoaderError::UnknownSplitPoint {
                split_point: sp,
                num_entries: self.numbering.num_entries(),
            })
        }
    }

    /// Requests the code for split point `sp`.
    pub fn inject(&mut self, sp: SplitPointId) -> Result<(), LoaderError> {
        self.check_split_point(sp)?;

        match self.state() {
            LoaderState::Steady => {
                debug!(split_point = %sp, "direct download");
                self.metrics.emit(&download_group(sp), EventPhase::Begin, None);
                self.transport
                    .start_download(self.numbering.exclusive_fragment(sp));
            }
            LoaderState::BaseLoading | LoaderState::LeftoversLoading => {
                debug!(split_point = %sp, queued = self.pending.len() + 1, "queued behind base");
                self.pending.push_back(sp);
            }
            LoaderState::Cold => {
                let fragment = self.numbering.base_fragment(sp);
                debug!(split_point = %sp, %fragment, "cold -> base-loading");
                self.base_loading = true;
                self.base_request = Some(sp);
                self.metrics
                    .emit(&download_group(sp), EventPhase::Begin, Some(fragment));
                self.transport.start_download(fragment);
            }
            LoaderState::AwaitingLeftovers => {
                self.pending.push_back(sp);
                self.start_leftovers();
            }
        }
        Ok(())
    }

    /// Transport callback: the fragment requested for split point `entry` is installed.
    pub fn fragment_has_loaded(&mut self, entry: SplitPointId) -> Result<(), LoaderError> {
        self.check_split_point(entry)?;

        let fragment = match self.base {
            Some(_) => self.numbering.exclusive_fragment(entry),
            None => self.numbering.base_fragment(entry),
        };
        self.metrics
            .emit(&download_group(entry), EventPhase::End, Some(fragment));

        if self.base.is_some() {
            debug!(split_point = %entry, %fragment, "exclusive fragment loaded");
            return Ok(());
        }

        if !self.base_loading {
            warn!(split_point = %entry, "base fragment reported loaded without a request");
        }
        debug!(split_point = %entry, "base-loading -> leftovers-loading");
        self.base = Some(entry);
        self.base_request = None;
        self.base_loading = false;
        self.start_leftovers();
        Ok(())
    }

    fn start_leftovers(&mut self) {
        let Some(fragment) = self.leftovers_fragment() else {
            return;
        };
        self.leftovers_loading = true;
        self.metrics
            .emit(LEFTOVERS_DOWNLOAD_GROUP, EventPhase::Begin, None);
        self.transport.start_download(fragment);
    }

    /// Transport callback: the leftovers fragment is installed.
    pub fn leftovers_fragment_has_loaded(&mut self) {
        if !self.leftovers_loading {
            warn!(state = %self.state(), "leftovers reported loaded without a request");
        }
        debug!(pending = self.pending.len(), "leftovers-loading -> steady");
        self.leftovers_loaded = true;
        self.leftovers_loading = false;
        self.metrics
            .emit(LEFTOVERS_DOWNLOAD_GROUP, EventPhase::End, None);

        while let Some(sp) = self.pending.pop_front() {
            // Queued ids were validated on the way in.
            if let Err(err) = self.inject(sp) {
                warn!(split_point = %sp, "dropping queued request: {err}");
            }
        }
    }

    /// Transport callback: a download ended without installing its fragment.
    ///
    /// Loader flags are left untouched, so a failed base or leftovers
    /// download stalls every queued split point until `reset_on_failure`.
    pub fn fragment_load_failed(
        &mut self,
        fragment: FragmentNumber,
        reason: InterruptReason,
    ) -> Result<LoadFailure, LoaderError> {
        let Some(kind) = self.numbering.classify(fragment) else {
            return Err(LoaderError::UnknownFragment {
                fragment,
                num_entries: self.numbering.num_entries(),
            });
        };
        let error = DownloadError { fragment, reason };

        let (affected, stalled) = match kind {
            FragmentKind::Base { split_point } => {
                let in_flight = self.base_loading && self.base_request == Some(split_point);
                let mut affected = vec![split_point];
                if in_flight {
                    affected.extend(self.pending.iter().copied());
                }
                (affected, in_flight)
            }
            FragmentKind::Leftovers { base } => {
                let in_flight = self.leftovers_loading && self.base == Some(base);
                let affected = if in_flight {
                    self.pending.iter().copied().collect()
                } else {
                    Vec::new()
                };
                (affected, in_flight)
            }
            FragmentKind::Exclusive { split_point } => (vec![split_point], false),
            FragmentKind::Initial => (Vec::new(), false),
        };

        warn!(
            %fragment,
            kind = kind.as_str(),
            %reason,
            stalled,
            affected = affected.len(),
            "fragment download failed"
        );

        Ok(LoadFailure {
            error,
            kind,
            affected,
            stalled,
        })
    }

    /// Opt-in recovery after a failed base or leftovers download.
    ///
    /// Returns the queued split points, which are no longer tracked. A loader
    /// that was loading its base goes back to `Cold`; one that was loading
    /// leftovers keeps its base and re-requests leftovers on the next `inject`.
    pub fn reset_on_failure(&mut self) -> Vec<SplitPointId> {
        let from = self.state();
        match from {
            LoaderState::BaseLoading => {
                self.base_loading = false;
                self.base_request = None;
            }
            LoaderState::LeftoversLoading => {
                self.leftovers_loading = false;
            }
            LoaderState::Cold | LoaderState::Steady | LoaderState::AwaitingLeftovers => {
                return Vec::new();
            }
        }
        let abandoned: Vec<SplitPointId> = self.pending.drain(..).collect();
        debug!(%from, to = %self.state(), abandoned = abandoned.len(), "reset after failure");
        abandoned
    }
}

impl<T: FragmentTransport + fmt::Debug> fmt::Debug for FragmentLoader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentLoader")
            .field("state", &self.state())
            .field("numbering", &self.numbering)
            .field("base", &self.base)
            .field("pending", &self.pending)
            .field("transport", &self.transport)
            .field("metrics", &self.metrics)
            .finish()
    }
}
