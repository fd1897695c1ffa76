//! Dispatch profiling and debugging hooks.
//!
//! Attaches to the runtime lookup path: per-call-site counters, breakpoints
//! on signature names, watches on signatures or single parameters, and a
//! bounded history of recent dispatch frames. Purely in-memory; reports are
//! plain data for the driver to print.

use crate::types::{SourceSpan, TypeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A profiled call site: signature name plus an optional location.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProbeSite {
    /// The dispatched signature name.
    pub signature: String,
    /// The call location, when the driver supplies one.
    pub location: Option<SourceSpan>,
}

/// Counter state for one call site.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCounter {
    /// Total dispatches observed.
    pub count: u64,
    /// Entry index of the most recent dispatch, if it matched.
    pub last_entry: Option<u32>,
}

/// A watch on a signature, optionally narrowed to one parameter index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSpec {
    /// The watched signature name.
    pub signature: String,
    /// Watch only this parameter's type, when set.
    pub parameter_index: Option<usize>,
}

/// One recorded dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFrame {
    /// Monotone sequence number.
    pub sequence: u64,
    /// The probed site.
    pub site: ProbeSite,
    /// Argument types at the dispatch.
    pub args: Vec<TypeId>,
    /// The entry the lookup returned, if any.
    pub entry: Option<u32>,
}

/// What a recorded dispatch triggered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProbeEvent {
    /// A breakpoint on this signature fired.
    pub breakpoint_hit: bool,
    /// At least one watch matched.
    pub watch_hit: bool,
}

/// Aggregated profile for the driver.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileReport {
    /// Total dispatches recorded.
    pub total_dispatches: u64,
    /// Dispatches that found no entry.
    pub misses: u64,
    /// Sites by descending dispatch count.
    pub hottest: Vec<(ProbeSite, u64)>,
}

/// The dispatch profiler.
#[derive(Clone, Debug)]
pub struct DispatchProfiler {
    counters: BTreeMap<ProbeSite, CallCounter>,
    breakpoints: BTreeSet<String>,
    watches: Vec<WatchSpec>,
    history: VecDeque<DispatchFrame>,
    history_capacity: usize,
    sequence: u64,
    misses: u64,
}

impl Default for DispatchProfiler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_HISTORY)
    }
}

impl DispatchProfiler {
    /// Default bound on retained frames.
    pub const DEFAULT_HISTORY: usize = 256;

    /// Creates a profiler retaining at most `history_capacity` frames.
    #[must_use]
    pub fn new(history_capacity: usize) -> Self {
        Self {
            counters: BTreeMap::new(),
            breakpoints: BTreeSet::new(),
            watches: Vec::new(),
            history: VecDeque::with_capacity(history_capacity.min(1024)),
            history_capacity,
            sequence: 0,
            misses: 0,
        }
    }

    /// Sets a breakpoint on a signature name.
    pub fn set_breakpoint(&mut self, signature: impl Into<String>) {
        self.breakpoints.insert(signature.into());
    }

    /// Clears a breakpoint; returns whether one was set.
    pub fn clear_breakpoint(&mut self, signature: &str) -> bool {
        self.breakpoints.remove(signature)
    }

    /// Adds a watch.
    pub fn add_watch(&mut self, watch: WatchSpec) {
        self.watches.push(watch);
    }

    /// Records one dispatch and reports what it triggered.
    pub fn record_dispatch(
        &mut self,
        site: ProbeSite,
        args: &[TypeId],
        entry: Option<u32>,
    ) -> ProbeEvent {
        self.sequence += 1;
        if entry.is_none() {
            self.misses += 1;
        }
        let counter = self.counters.entry(site.clone()).or_default();
        counter.count += 1;
        counter.last_entry = entry;

        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(DispatchFrame {
            sequence: self.sequence,
            site: site.clone(),
            args: args.to_vec(),
            entry,
        });

        let breakpoint_hit = self.breakpoints.contains(&site.signature);
        let watch_hit = self.watches.iter().any(|w| {
            w.signature == site.signature
                && w.parameter_index.is_none_or(|i| i < args.len())
        });
        if breakpoint_hit {
            tracing::debug!(signature = %site.signature, "dispatch breakpoint hit");
        }
        ProbeEvent {
            breakpoint_hit,
            watch_hit,
        }
    }

    /// The counter for a site, if it has dispatched.
    #[must_use]
    pub fn counter(&self, site: &ProbeSite) -> Option<&CallCounter> {
        self.counters.get(site)
    }

    /// Recent frames, oldest first.
    #[must_use]
    pub fn history(&self) -> &VecDeque<DispatchFrame> {
        &self.history
    }

    /// Total observed call counts per implementation-selecting signature,
    /// for the compressor's frequency flags.
    #[must_use]
    pub fn signature_counts(&self) -> BTreeMap<String, u64> {
        let mut out: BTreeMap<String, u64> = BTreeMap::new();
        for (site, counter) in &self.counters {
            *out.entry(site.signature.clone()).or_default() += counter.count;
        }
        out
    }

    /// Builds the aggregate report.
    #[must_use]
    pub fn report(&self) -> ProfileReport {
        let mut hottest: Vec<(ProbeSite, u64)> = self
            .counters
            .iter()
            .map(|(site, counter)| (site.clone(), counter.count))
            .collect();
        hottest.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ProfileReport {
            total_dispatches: self.sequence,
            misses: self.misses,
            hottest,
        }
    }
}
