//! Collection run orchestration: hierarchy walker plus worker pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use orglens_core::{AppError, AppResult, CollectionRunId};
use orglens_domain::{ResourceKind, ResourceRef};
use tokio::sync::mpsc;
use tracing::info;

use crate::collector_ports::{HierarchySource, PolicySink, PolicySource, PolicyTableSchema};

mod distributor;
mod summary;
mod walker;

use distributor::{RetryPolicy, WorkDistributor};

pub use summary::RunSummary;
pub use walker::{HierarchyWalker, WalkOutcome};

/// Cooperative cancellation handle checked at each dequeue and each walker node.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates a flag in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a graceful stop of the current run.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns whether a stop has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tunables for one collection run.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Number of concurrent policy workers.
    pub worker_count: usize,
    /// Maximum hierarchy depth before a subtree is abandoned.
    pub max_depth: u32,
    /// Extra fetch attempts for transient failures; zero disables retries.
    pub transient_retry_attempts: u32,
    /// Base backoff between transient retries, multiplied per attempt.
    pub retry_backoff_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            max_depth: 32,
            transient_retry_attempts: 0,
            retry_backoff_ms: 200,
        }
    }
}

/// Point-in-time policy snapshot collector over one organization hierarchy.
#[derive(Clone)]
pub struct CollectorService {
    hierarchy: Arc<dyn HierarchySource>,
    policies: Arc<dyn PolicySource>,
    sink: Arc<dyn PolicySink>,
    config: CollectorConfig,
    cancellation: CancellationFlag,
}

impl CollectorService {
    /// Creates a collector service with validated configuration.
    pub fn new(
        hierarchy: Arc<dyn HierarchySource>,
        policies: Arc<dyn PolicySource>,
        sink: Arc<dyn PolicySink>,
        config: CollectorConfig,
    ) -> AppResult<Self> {
        if config.worker_count == 0 {
            return Err(AppError::Validation(
                "worker_count must be greater than zero".to_owned(),
            ));
        }

        if config.max_depth == 0 {
            return Err(AppError::Validation(
                "max_depth must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            hierarchy,
            policies,
            sink,
            config,
            cancellation: CancellationFlag::new(),
        })
    }

    /// Returns a handle that can request a graceful stop of the run.
    #[must_use]
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancellation.clone()
    }

    /// Runs one collection to completion over the subtree rooted at `root`.
    ///
    /// Provisions the sink schema, then walks the hierarchy while a fixed
    /// pool of workers drains discovered resources. Per-resource failures
    /// are logged and counted in the summary; only startup failures (schema
    /// provisioning, invalid root) return an error.
    pub async fn run(&self, root: ResourceRef) -> AppResult<RunSummary> {
        if root.kind() != ResourceKind::Organization {
            return Err(AppError::Validation(format!(
                "collection root must be an organization, got {}",
                root.resource_name()
            )));
        }

        let run_id = CollectionRunId::new();
        info!(
            run_id = %run_id,
            root = %root,
            worker_count = self.config.worker_count,
            "collection run started"
        );

        self.sink
            .ensure_schema(&PolicyTableSchema::policy_rows())
            .await?;

        // The walker owns the only sender; dropping it on traversal return
        // closes the channel after the queued items drain, which is the
        // workers' completion signal.
        let (discoveries, queue) = mpsc::unbounded_channel();

        let walker = HierarchyWalker::new(
            self.hierarchy.clone(),
            self.config.max_depth,
            self.cancellation.clone(),
        );
        let walker_task = tokio::spawn(async move { walker.walk(root, discoveries).await });

        let distributor = WorkDistributor::new(
            self.policies.clone(),
            self.sink.clone(),
            self.config.worker_count,
            RetryPolicy {
                transient_attempts: self.config.transient_retry_attempts,
                backoff_ms: self.config.retry_backoff_ms,
            },
            self.cancellation.clone(),
        );
        let worker_stats = distributor.run(queue).await;

        let walk_outcome = walker_task.await.map_err(|error| {
            AppError::Internal(format!("hierarchy walker task failed: {error}"))
        })?;

        let summary = RunSummary::from_parts(run_id, walk_outcome, worker_stats);
        info!(
            run_id = %run_id,
            resources_discovered = summary.resources_discovered,
            resources_processed = summary.resources_processed,
            rows_written = summary.rows_written,
            "collection run finished"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests;
