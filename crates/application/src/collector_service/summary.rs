use orglens_core::CollectionRunId;

use super::walker::WalkOutcome;

/// Counters accumulated by the worker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DistributorStats {
    pub(crate) resources_processed: u64,
    pub(crate) rows_written: u64,
    pub(crate) rows_rejected: u64,
    pub(crate) fetch_errors: u64,
    pub(crate) sink_errors: u64,
    pub(crate) worker_failures: u64,
}

impl DistributorStats {
    pub(crate) fn merge(&mut self, other: &Self) {
        self.resources_processed = self.resources_processed.saturating_add(other.resources_processed);
        self.rows_written = self.rows_written.saturating_add(other.rows_written);
        self.rows_rejected = self.rows_rejected.saturating_add(other.rows_rejected);
        self.fetch_errors = self.fetch_errors.saturating_add(other.fetch_errors);
        self.sink_errors = self.sink_errors.saturating_add(other.sink_errors);
        self.worker_failures = self.worker_failures.saturating_add(other.worker_failures);
    }
}

/// Final state of one collection run.
///
/// Per-resource failures are reported here rather than failing the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Identifier of this run.
    pub run_id: CollectionRunId,
    /// Resources emitted by the walker.
    pub resources_discovered: u64,
    /// Resources whose policy was fetched and aggregated.
    pub resources_processed: u64,
    /// Rows accepted by the sink.
    pub rows_written: u64,
    /// Rows rejected by the sink inside accepted batches.
    pub rows_rejected: u64,
    /// Resources dropped because their policy fetch failed.
    pub fetch_errors: u64,
    /// Resource batches dropped because the sink was unavailable.
    pub sink_errors: u64,
    /// Failed or rejected child listings during traversal.
    pub listing_errors: u64,
    /// Subtrees abandoned before being fully traversed.
    pub abandoned_subtrees: u64,
    /// Workers that terminated abnormally.
    pub worker_failures: u64,
}

impl RunSummary {
    pub(crate) fn from_parts(
        run_id: CollectionRunId,
        walk: WalkOutcome,
        workers: DistributorStats,
    ) -> Self {
        Self {
            run_id,
            resources_discovered: walk.discovered,
            resources_processed: workers.resources_processed,
            rows_written: workers.rows_written,
            rows_rejected: workers.rows_rejected,
            fetch_errors: workers.fetch_errors,
            sink_errors: workers.sink_errors,
            listing_errors: walk.listing_errors,
            abandoned_subtrees: walk.abandoned_subtrees,
            worker_failures: workers.worker_failures,
        }
    }
}
