use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use crate::utils::variants::Variant;
use crate::utils::vcf::FilterSpec;


/// Run-wide tallies shared by every worker.
#[derive(Debug, Default)]
pub struct ExclusionCounters {
    at_end: AtomicU64,
    filtered: AtomicU64,
    failed_reads: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub at_end: u64,
    pub filtered: u64,
    pub failed_reads: u64,
}

impl ExclusionCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(ExclusionCounters::default())
    }

    pub fn add_failed_read(&self) {
        self.failed_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            at_end: self.at_end.load(Ordering::Acquire),
            filtered: self.filtered.load(Ordering::Acquire),
            failed_reads: self.failed_reads.load(Ordering::Acquire),
        }
    }
}


/// Removals made by a single `FilterChain::apply` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterCounts {
    pub at_end: u64,
    pub filtered: u64,
}

/// One predicate-based removal step.
#[derive(Debug, Clone)]
pub enum FilterStage {
    /// Drops variants touching either end of the alignment.
    AlignmentEnd,
    /// Drops variants at positions listed in the FilterSpec.
    ExcludedPositions(Arc<FilterSpec>),
}

impl FilterStage {
    fn rejects(&self, variant: &Variant) -> bool {
        match self {
            FilterStage::AlignmentEnd => variant.at_end_of_alignment,
            FilterStage::ExcludedPositions(spec) => spec.contains_variant(variant),
        }
    }

    /// Removes rejected variants in place and returns how many were removed.
    pub fn apply(&self, variants: &mut Vec<Variant>) -> u64 {
        let before = variants.len();
        variants.retain(|v| !self.rejects(v));
        (before - variants.len()) as u64
    }

    fn counter<'a>(&self, counters: &'a ExclusionCounters) -> &'a AtomicU64 {
        match self {
            FilterStage::AlignmentEnd => &counters.at_end,
            FilterStage::ExcludedPositions(_) => &counters.filtered,
        }
    }
}


/// Ordered filter stages. The alignment-end stage always runs first so a variant
/// rejected by both stages is counted once, against the end counter.
#[derive(Debug, Clone)]
pub struct FilterChain {
    stages: Vec<FilterStage>,
    counters: Arc<ExclusionCounters>,
}

impl FilterChain {
    pub fn new(filter_spec: Option<Arc<FilterSpec>>, counters: Arc<ExclusionCounters>) -> Self {
        let mut stages = vec![FilterStage::AlignmentEnd];
        if let Some(spec) = filter_spec {
            stages.push(FilterStage::ExcludedPositions(spec));
        }
        FilterChain { stages, counters }
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    pub fn counters(&self) -> &Arc<ExclusionCounters> {
        &self.counters
    }

    pub fn apply(&self, mut variants: Vec<Variant>) -> (Vec<Variant>, FilterCounts) {
        let mut counts = FilterCounts::default();
        for stage in &self.stages {
            if variants.is_empty() {
                break;
            }
            let removed = stage.apply(&mut variants);
            if removed == 0 {
                continue;
            }
            stage.counter(&self.counters).fetch_add(removed, Ordering::Relaxed);
            match stage {
                FilterStage::AlignmentEnd => counts.at_end += removed,
                FilterStage::ExcludedPositions(_) => counts.filtered += removed,
            }
        }
        (variants, counts)
    }
}
