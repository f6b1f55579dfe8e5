use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orglens_domain::{Binding, ResourceRef, aggregate_bindings};
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::CancellationFlag;
use super::summary::DistributorStats;
use crate::collector_ports::{FetchError, FetchErrorKind, PolicySink, PolicySource};

/// Retry behavior for transient policy fetch failures.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    /// Extra attempts after the first failure; zero disables retries.
    pub(crate) transient_attempts: u32,
    /// Base backoff, multiplied by the attempt number.
    pub(crate) backoff_ms: u64,
}

/// Fixed pool of workers draining the discovery queue.
///
/// Each worker keeps dequeuing until `recv` yields `None`. The channel only
/// closes after the walker has dropped its sender and every queued item has
/// been taken, so a transiently empty queue mid-discovery never terminates
/// a worker, and an in-flight item is always finished before its worker
/// exits.
pub(crate) struct WorkDistributor {
    policies: Arc<dyn PolicySource>,
    sink: Arc<dyn PolicySink>,
    worker_count: usize,
    retry: RetryPolicy,
    cancellation: CancellationFlag,
}

impl WorkDistributor {
    pub(crate) fn new(
        policies: Arc<dyn PolicySource>,
        sink: Arc<dyn PolicySink>,
        worker_count: usize,
        retry: RetryPolicy,
        cancellation: CancellationFlag,
    ) -> Self {
        Self {
            policies,
            sink,
            worker_count,
            retry,
            cancellation,
        }
    }

    /// Drains the queue with the configured worker pool and returns summed stats.
    pub(crate) async fn run(&self, queue: UnboundedReceiver<ResourceRef>) -> DistributorStats {
        let queue = Arc::new(Mutex::new(queue));
        let mut workers: JoinSet<DistributorStats> = JoinSet::new();

        for worker_index in 0..self.worker_count {
            workers.spawn(Self::worker_loop(
                worker_index,
                self.policies.clone(),
                self.sink.clone(),
                queue.clone(),
                self.retry,
                self.cancellation.clone(),
            ));
        }

        let mut totals = DistributorStats::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(stats) => totals.merge(&stats),
                Err(error) => {
                    warn!(error = %error, "policy worker terminated abnormally");
                    totals.worker_failures = totals.worker_failures.saturating_add(1);
                }
            }
        }

        totals
    }

    async fn worker_loop(
        worker_index: usize,
        policies: Arc<dyn PolicySource>,
        sink: Arc<dyn PolicySink>,
        queue: Arc<Mutex<UnboundedReceiver<ResourceRef>>>,
        retry: RetryPolicy,
        cancellation: CancellationFlag,
    ) -> DistributorStats {
        let mut stats = DistributorStats::default();

        loop {
            if cancellation.is_cancelled() {
                debug!(worker = worker_index, "cancellation requested; worker stopping");
                break;
            }

            let next = { queue.lock().await.recv().await };
            let Some(resource) = next else {
                debug!(worker = worker_index, "discovery queue drained; worker stopping");
                break;
            };

            Self::process_resource(worker_index, &policies, &sink, retry, resource, &mut stats)
                .await;
        }

        stats
    }

    async fn process_resource(
        worker_index: usize,
        policies: &Arc<dyn PolicySource>,
        sink: &Arc<dyn PolicySink>,
        retry: RetryPolicy,
        resource: ResourceRef,
        stats: &mut DistributorStats,
    ) {
        let bindings = match Self::fetch_with_retry(policies, retry, &resource).await {
            Ok(bindings) => bindings,
            Err(error) => {
                warn!(
                    worker = worker_index,
                    resource = %resource,
                    category = error.kind.as_str(),
                    error = %error,
                    "policy fetch failed; dropping resource"
                );
                stats.fetch_errors = stats.fetch_errors.saturating_add(1);
                return;
            }
        };

        stats.resources_processed = stats.resources_processed.saturating_add(1);

        let rows = aggregate_bindings(&resource, &bindings, Utc::now().date_naive());
        if rows.is_empty() {
            debug!(worker = worker_index, resource = %resource, "no retained principals");
            return;
        }

        match sink.append_rows(&rows).await {
            Ok(row_errors) => {
                let rejected = u64::try_from(row_errors.len()).unwrap_or(u64::MAX);
                let written =
                    u64::try_from(rows.len()).unwrap_or(u64::MAX).saturating_sub(rejected);
                stats.rows_written = stats.rows_written.saturating_add(written);
                stats.rows_rejected = stats.rows_rejected.saturating_add(rejected);

                for row_error in row_errors {
                    warn!(
                        worker = worker_index,
                        resource = %resource,
                        row_index = row_error.row_index,
                        message = %row_error.message,
                        "sink rejected row"
                    );
                }
            }
            Err(error) => {
                warn!(
                    worker = worker_index,
                    resource = %resource,
                    rows = rows.len(),
                    error = %error,
                    "sink unavailable; dropping resource rows"
                );
                stats.sink_errors = stats.sink_errors.saturating_add(1);
            }
        }
    }

    async fn fetch_with_retry(
        policies: &Arc<dyn PolicySource>,
        retry: RetryPolicy,
        resource: &ResourceRef,
    ) -> Result<Vec<Binding>, FetchError> {
        let mut attempt = 0_u32;

        loop {
            attempt = attempt.saturating_add(1);
            match policies.get_iam_policy(resource).await {
                Ok(bindings) => return Ok(bindings),
                Err(error)
                    if error.kind == FetchErrorKind::Transient
                        && attempt <= retry.transient_attempts =>
                {
                    warn!(
                        resource = %resource,
                        attempt,
                        error = %error,
                        "transient fetch failure; retrying"
                    );
                    let delay = retry.backoff_ms.saturating_mul(u64::from(attempt));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
