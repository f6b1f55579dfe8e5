use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use orglens_core::{AppError, AppResult};
use orglens_domain::{Binding, PolicyRow, ResourceRef};

use crate::collector_ports::{
    FetchError, FetchErrorKind, FolderSummary, HierarchySource, ListingError, ListingErrorKind,
    PolicySink, PolicySource, PolicyTableSchema, ProjectSummary, RowAppendError, SinkError,
};

use super::{CollectorConfig, CollectorService};

#[derive(Default)]
struct FakeHierarchy {
    folders: HashMap<String, Vec<FolderSummary>>,
    projects: HashMap<String, Vec<ProjectSummary>>,
    failing_folder_listings: HashSet<String>,
    failing_project_listings: HashSet<String>,
    listing_delay_ms: u64,
}

impl FakeHierarchy {
    fn listing_error(&self, parent: &ResourceRef) -> ListingError {
        ListingError {
            parent_name: parent.resource_name(),
            kind: ListingErrorKind::Transient,
            message: "simulated listing failure".to_owned(),
        }
    }
}

#[async_trait]
impl HierarchySource for FakeHierarchy {
    async fn list_child_folders(
        &self,
        parent: &ResourceRef,
    ) -> Result<Vec<FolderSummary>, ListingError> {
        if self.listing_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.listing_delay_ms)).await;
        }

        if self.failing_folder_listings.contains(&parent.resource_name()) {
            return Err(self.listing_error(parent));
        }

        Ok(self
            .folders
            .get(&parent.resource_name())
            .cloned()
            .unwrap_or_default())
    }

    async fn list_child_projects(
        &self,
        parent: &ResourceRef,
    ) -> Result<Vec<ProjectSummary>, ListingError> {
        if self.listing_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.listing_delay_ms)).await;
        }

        if self.failing_project_listings.contains(&parent.resource_name()) {
            return Err(self.listing_error(parent));
        }

        Ok(self
            .projects
            .get(&parent.resource_name())
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct FakePolicySource {
    policies: HashMap<String, Vec<Binding>>,
    failing: HashMap<String, FetchErrorKind>,
    transient_failures_remaining: Mutex<i32>,
    fetch_log: Mutex<Vec<String>>,
}

#[async_trait]
impl PolicySource for FakePolicySource {
    async fn get_iam_policy(&self, resource: &ResourceRef) -> Result<Vec<Binding>, FetchError> {
        self.fetch_log.lock().await.push(resource.resource_name());

        {
            let mut remaining = self.transient_failures_remaining.lock().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FetchError {
                    resource_name: resource.resource_name(),
                    kind: FetchErrorKind::Transient,
                    message: "simulated transient failure".to_owned(),
                });
            }
        }

        if let Some(kind) = self.failing.get(&resource.resource_name()) {
            return Err(FetchError {
                resource_name: resource.resource_name(),
                kind: *kind,
                message: "simulated fetch failure".to_owned(),
            });
        }

        Ok(self
            .policies
            .get(&resource.resource_name())
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct FakeSink {
    rows: Mutex<Vec<PolicyRow>>,
    ensure_schema_calls: Mutex<u32>,
    reject_members: HashSet<String>,
    unavailable_for_projects: HashSet<String>,
    schema_unavailable: bool,
}

#[async_trait]
impl PolicySink for FakeSink {
    async fn ensure_schema(&self, _schema: &PolicyTableSchema) -> AppResult<()> {
        if self.schema_unavailable {
            return Err(AppError::Internal(
                "simulated sink provisioning failure".to_owned(),
            ));
        }

        *self.ensure_schema_calls.lock().await += 1;
        Ok(())
    }

    async fn append_rows(&self, rows: &[PolicyRow]) -> Result<Vec<RowAppendError>, SinkError> {
        if rows
            .iter()
            .any(|row| match &row.project_id {
                Some(project_id) => self.unavailable_for_projects.contains(project_id),
                None => false,
            })
        {
            return Err(SinkError {
                message: "simulated sink outage".to_owned(),
            });
        }

        let mut row_errors = Vec::new();
        let mut stored = self.rows.lock().await;
        for (row_index, row) in rows.iter().enumerate() {
            if self.reject_members.contains(&row.member_email) {
                row_errors.push(RowAppendError {
                    row_index,
                    message: "simulated row rejection".to_owned(),
                });
            } else {
                stored.push(row.clone());
            }
        }

        Ok(row_errors)
    }
}

fn org_ref(id: &str) -> ResourceRef {
    ResourceRef::organization(id).unwrap_or_else(|_| unreachable!())
}

fn folder_summary(id: &str) -> FolderSummary {
    FolderSummary {
        id: id.to_owned(),
        display_name: None,
    }
}

fn project_summary(id: &str) -> ProjectSummary {
    ProjectSummary { id: id.to_owned() }
}

fn binding(role: &str, members: &[&str]) -> Binding {
    Binding::new(role, members.iter().map(|member| (*member).to_owned()).collect())
        .unwrap_or_else(|_| unreachable!())
}

fn build_service(
    hierarchy: Arc<FakeHierarchy>,
    policies: Arc<FakePolicySource>,
    sink: Arc<FakeSink>,
    config: CollectorConfig,
) -> CollectorService {
    CollectorService::new(hierarchy, policies, sink, config).unwrap_or_else(|_| unreachable!())
}

#[tokio::test]
async fn end_to_end_scenario_collects_expected_rows() {
    let hierarchy = Arc::new(FakeHierarchy {
        folders: HashMap::from([("organizations/org1".to_owned(), vec![folder_summary("f1")])]),
        projects: HashMap::from([("folders/f1".to_owned(), vec![project_summary("p1")])]),
        ..FakeHierarchy::default()
    });
    let policies = Arc::new(FakePolicySource {
        policies: HashMap::from([
            (
                "organizations/org1".to_owned(),
                vec![binding("roles/owner", &["user:a@example.com"])],
            ),
            ("folders/f1".to_owned(), Vec::new()),
            (
                "projects/p1".to_owned(),
                vec![
                    binding("roles/editor", &["user:a@example.com"]),
                    binding("roles/viewer", &["user:a@example.com"]),
                ],
            ),
        ]),
        ..FakePolicySource::default()
    });
    let sink = Arc::new(FakeSink::default());

    let service = build_service(
        hierarchy,
        policies,
        sink.clone(),
        CollectorConfig::default(),
    );
    let summary = service.run(org_ref("org1")).await;

    assert!(summary.is_ok());
    let summary = summary.unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.resources_discovered, 3);
    assert_eq!(summary.resources_processed, 3);
    assert_eq!(summary.rows_written, 2);
    assert_eq!(summary.fetch_errors, 0);

    let rows = sink.rows.lock().await;
    assert_eq!(rows.len(), 2);

    let org_row = rows
        .iter()
        .find(|row| row.organization_id.as_deref() == Some("org1"));
    assert!(org_row.is_some_and(|row| {
        row.member_email == "user:a@example.com" && row.role == "roles/owner"
    }));

    let project_row = rows
        .iter()
        .find(|row| row.project_id.as_deref() == Some("p1"));
    assert!(project_row.is_some_and(|row| row.role == "roles/editor,roles/viewer"));

    assert!(rows.iter().all(|row| row.folder_id.is_none()));
}

#[tokio::test]
async fn every_reachable_resource_is_processed_exactly_once() {
    let hierarchy = Arc::new(FakeHierarchy {
        folders: HashMap::from([
            (
                "organizations/org1".to_owned(),
                vec![folder_summary("f1"), folder_summary("f2")],
            ),
            ("folders/f1".to_owned(), vec![folder_summary("f1a")]),
        ]),
        projects: HashMap::from([
            ("organizations/org1".to_owned(), vec![project_summary("p0")]),
            (
                "folders/f1".to_owned(),
                vec![project_summary("p1"), project_summary("p2")],
            ),
            ("folders/f2".to_owned(), vec![project_summary("p3")]),
        ]),
        ..FakeHierarchy::default()
    });
    let policies = Arc::new(FakePolicySource::default());
    let sink = Arc::new(FakeSink::default());

    let service = build_service(
        hierarchy,
        policies.clone(),
        sink,
        CollectorConfig::default(),
    );
    let summary = service.run(org_ref("org1")).await;

    assert!(summary.is_ok());
    let summary = summary.unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.resources_discovered, 8);
    assert_eq!(summary.resources_processed, 8);

    let mut fetched = policies.fetch_log.lock().await.clone();
    fetched.sort_unstable();
    let distinct: HashSet<&String> = fetched.iter().collect();
    assert_eq!(fetched.len(), 8);
    assert_eq!(distinct.len(), 8, "a resource was processed twice");
}

#[tokio::test]
async fn folder_listing_failure_abandons_only_that_subtree() {
    let hierarchy = Arc::new(FakeHierarchy {
        folders: HashMap::from([
            (
                "organizations/org1".to_owned(),
                vec![folder_summary("f1"), folder_summary("f2")],
            ),
            ("folders/f1".to_owned(), vec![folder_summary("f1a")]),
        ]),
        projects: HashMap::from([
            ("folders/f1".to_owned(), vec![project_summary("p1")]),
            ("folders/f2".to_owned(), vec![project_summary("p2")]),
        ]),
        failing_folder_listings: HashSet::from(["folders/f1".to_owned()]),
        ..FakeHierarchy::default()
    });
    let policies = Arc::new(FakePolicySource::default());
    let sink = Arc::new(FakeSink::default());

    let service = build_service(
        hierarchy,
        policies.clone(),
        sink,
        CollectorConfig::default(),
    );
    let summary = service.run(org_ref("org1")).await;

    assert!(summary.is_ok());
    let summary = summary.unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.listing_errors, 1);
    assert_eq!(summary.abandoned_subtrees, 1);

    let fetched = policies.fetch_log.lock().await.clone();
    assert!(!fetched.contains(&"folders/f1a".to_owned()));
    // f1's own policy and its projects are still collected; so is the f2 subtree.
    assert!(fetched.contains(&"folders/f1".to_owned()));
    assert!(fetched.contains(&"projects/p1".to_owned()));
    assert!(fetched.contains(&"folders/f2".to_owned()));
    assert!(fetched.contains(&"projects/p2".to_owned()));
}

#[tokio::test]
async fn project_listing_failure_keeps_folder_recursion() {
    let hierarchy = Arc::new(FakeHierarchy {
        folders: HashMap::from([("organizations/org1".to_owned(), vec![folder_summary("f1")])]),
        projects: HashMap::from([
            ("organizations/org1".to_owned(), vec![project_summary("p0")]),
            ("folders/f1".to_owned(), vec![project_summary("p1")]),
        ]),
        failing_project_listings: HashSet::from(["organizations/org1".to_owned()]),
        ..FakeHierarchy::default()
    });
    let policies = Arc::new(FakePolicySource::default());
    let sink = Arc::new(FakeSink::default());

    let service = build_service(
        hierarchy,
        policies.clone(),
        sink,
        CollectorConfig::default(),
    );
    let summary = service.run(org_ref("org1")).await;

    assert!(summary.is_ok());
    let summary = summary.unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.listing_errors, 1);

    let fetched = policies.fetch_log.lock().await.clone();
    assert!(!fetched.contains(&"projects/p0".to_owned()));
    // The folder subtree discovered before the failing project listing is unaffected.
    assert!(fetched.contains(&"folders/f1".to_owned()));
    assert!(fetched.contains(&"projects/p1".to_owned()));
}

#[tokio::test]
async fn shutdown_waits_for_slow_discovery() {
    let hierarchy = Arc::new(FakeHierarchy {
        folders: HashMap::from([
            ("organizations/org1".to_owned(), vec![folder_summary("f1")]),
            ("folders/f1".to_owned(), vec![folder_summary("f2")]),
            ("folders/f2".to_owned(), vec![folder_summary("f3")]),
        ]),
        projects: HashMap::from([
            ("folders/f1".to_owned(), vec![project_summary("p1")]),
            ("folders/f2".to_owned(), vec![project_summary("p2")]),
            ("folders/f3".to_owned(), vec![project_summary("p3")]),
        ]),
        listing_delay_ms: 25,
        ..FakeHierarchy::default()
    });
    let policies = Arc::new(FakePolicySource::default());
    let sink = Arc::new(FakeSink::default());

    let service = build_service(
        hierarchy,
        policies,
        sink,
        CollectorConfig {
            worker_count: 4,
            ..CollectorConfig::default()
        },
    );
    let summary = service.run(org_ref("org1")).await;

    // Workers outpace the walker and see a transiently empty queue, but the
    // run must not complete until every late-discovered resource is processed.
    assert!(summary.is_ok());
    let summary = summary.unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.resources_discovered, 7);
    assert_eq!(summary.resources_processed, 7);
}

#[tokio::test]
async fn fetch_failure_drops_only_that_resource() {
    let hierarchy = Arc::new(FakeHierarchy {
        projects: HashMap::from([(
            "organizations/org1".to_owned(),
            vec![project_summary("p1"), project_summary("p2")],
        )]),
        ..FakeHierarchy::default()
    });
    let policies = Arc::new(FakePolicySource {
        policies: HashMap::from([
            (
                "organizations/org1".to_owned(),
                vec![binding("roles/owner", &["user:a@example.com"])],
            ),
            (
                "projects/p2".to_owned(),
                vec![binding("roles/viewer", &["user:b@example.com"])],
            ),
        ]),
        failing: HashMap::from([("projects/p1".to_owned(), FetchErrorKind::PermissionDenied)]),
        ..FakePolicySource::default()
    });
    let sink = Arc::new(FakeSink::default());

    let service = build_service(
        hierarchy,
        policies,
        sink.clone(),
        CollectorConfig::default(),
    );
    let summary = service.run(org_ref("org1")).await;

    assert!(summary.is_ok());
    let summary = summary.unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.fetch_errors, 1);
    assert_eq!(summary.resources_processed, 2);
    assert_eq!(summary.rows_written, 2);

    let rows = sink.rows.lock().await;
    assert!(rows.iter().all(|row| row.project_id.as_deref() != Some("p1")));
}

#[tokio::test]
async fn transient_fetch_failures_are_retried_when_configured() {
    let hierarchy = Arc::new(FakeHierarchy::default());
    let policies = Arc::new(FakePolicySource {
        policies: HashMap::from([(
            "organizations/org1".to_owned(),
            vec![binding("roles/owner", &["user:a@example.com"])],
        )]),
        ..FakePolicySource::default()
    });
    *policies.transient_failures_remaining.lock().await = 1;
    let sink = Arc::new(FakeSink::default());

    let service = build_service(
        hierarchy,
        policies,
        sink.clone(),
        CollectorConfig {
            transient_retry_attempts: 2,
            retry_backoff_ms: 1,
            ..CollectorConfig::default()
        },
    );
    let summary = service.run(org_ref("org1")).await;

    assert!(summary.is_ok());
    let summary = summary.unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.fetch_errors, 0);
    assert_eq!(summary.rows_written, 1);
    assert_eq!(sink.rows.lock().await.len(), 1);
}

#[tokio::test]
async fn transient_fetch_failure_is_dropped_by_default() {
    let hierarchy = Arc::new(FakeHierarchy::default());
    let policies = Arc::new(FakePolicySource {
        policies: HashMap::from([(
            "organizations/org1".to_owned(),
            vec![binding("roles/owner", &["user:a@example.com"])],
        )]),
        ..FakePolicySource::default()
    });
    *policies.transient_failures_remaining.lock().await = 1;
    let sink = Arc::new(FakeSink::default());

    let service = build_service(
        hierarchy,
        policies,
        sink.clone(),
        CollectorConfig::default(),
    );
    let summary = service.run(org_ref("org1")).await;

    assert!(summary.is_ok());
    let summary = summary.unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.fetch_errors, 1);
    assert_eq!(summary.rows_written, 0);
    assert!(sink.rows.lock().await.is_empty());
}

#[tokio::test]
async fn sink_rejects_individual_rows_without_failing_run() {
    let hierarchy = Arc::new(FakeHierarchy::default());
    let policies = Arc::new(FakePolicySource {
        policies: HashMap::from([(
            "organizations/org1".to_owned(),
            vec![binding(
                "roles/viewer",
                &["user:good@example.com", "user:bad@example.com"],
            )],
        )]),
        ..FakePolicySource::default()
    });
    let sink = Arc::new(FakeSink {
        reject_members: HashSet::from(["user:bad@example.com".to_owned()]),
        ..FakeSink::default()
    });

    let service = build_service(
        hierarchy,
        policies,
        sink.clone(),
        CollectorConfig::default(),
    );
    let summary = service.run(org_ref("org1")).await;

    assert!(summary.is_ok());
    let summary = summary.unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.rows_written, 1);
    assert_eq!(summary.rows_rejected, 1);
    assert_eq!(summary.sink_errors, 0);

    let rows = sink.rows.lock().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].member_email, "user:good@example.com");
}

#[tokio::test]
async fn sink_unavailability_drops_only_that_batch() {
    let hierarchy = Arc::new(FakeHierarchy {
        projects: HashMap::from([("organizations/org1".to_owned(), vec![project_summary("p1")])]),
        ..FakeHierarchy::default()
    });
    let policies = Arc::new(FakePolicySource {
        policies: HashMap::from([
            (
                "organizations/org1".to_owned(),
                vec![binding("roles/owner", &["user:a@example.com"])],
            ),
            (
                "projects/p1".to_owned(),
                vec![binding("roles/viewer", &["user:b@example.com"])],
            ),
        ]),
        ..FakePolicySource::default()
    });
    let sink = Arc::new(FakeSink {
        unavailable_for_projects: HashSet::from(["p1".to_owned()]),
        ..FakeSink::default()
    });

    let service = build_service(
        hierarchy,
        policies,
        sink.clone(),
        CollectorConfig::default(),
    );
    let summary = service.run(org_ref("org1")).await;

    assert!(summary.is_ok());
    let summary = summary.unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.sink_errors, 1);
    assert_eq!(summary.rows_written, 1);

    let rows = sink.rows.lock().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].organization_id.as_deref(), Some("org1"));
}

#[tokio::test]
async fn schema_provisioning_failure_is_fatal() {
    let hierarchy = Arc::new(FakeHierarchy::default());
    let policies = Arc::new(FakePolicySource::default());
    let sink = Arc::new(FakeSink {
        schema_unavailable: true,
        ..FakeSink::default()
    });

    let service = build_service(hierarchy, policies.clone(), sink, CollectorConfig::default());
    let summary = service.run(org_ref("org1")).await;

    assert!(summary.is_err());
    assert!(policies.fetch_log.lock().await.is_empty());
}

#[tokio::test]
async fn rerunning_against_provisioned_sink_succeeds() {
    let hierarchy = Arc::new(FakeHierarchy::default());
    let policies = Arc::new(FakePolicySource {
        policies: HashMap::from([(
            "organizations/org1".to_owned(),
            vec![binding("roles/owner", &["user:a@example.com"])],
        )]),
        ..FakePolicySource::default()
    });
    let sink = Arc::new(FakeSink::default());

    let service = build_service(
        hierarchy,
        policies,
        sink.clone(),
        CollectorConfig::default(),
    );

    let first = service.run(org_ref("org1")).await;
    let second = service.run(org_ref("org1")).await;

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(*sink.ensure_schema_calls.lock().await, 2);
    assert_eq!(sink.rows.lock().await.len(), 2);
}

#[tokio::test]
async fn cancellation_stops_run_gracefully() {
    let hierarchy = Arc::new(FakeHierarchy {
        projects: HashMap::from([(
            "organizations/org1".to_owned(),
            vec![project_summary("p1")],
        )]),
        ..FakeHierarchy::default()
    });
    let policies = Arc::new(FakePolicySource::default());
    let sink = Arc::new(FakeSink::default());

    let service = build_service(
        hierarchy,
        policies.clone(),
        sink,
        CollectorConfig::default(),
    );
    service.cancellation().cancel();
    let summary = service.run(org_ref("org1")).await;

    assert!(summary.is_ok());
    let summary = summary.unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.resources_processed, 0);
    assert!(policies.fetch_log.lock().await.is_empty());
}

#[tokio::test]
async fn depth_limit_abandons_runaway_subtree() {
    let hierarchy = Arc::new(FakeHierarchy {
        folders: HashMap::from([
            ("organizations/org1".to_owned(), vec![folder_summary("fa")]),
            ("folders/fa".to_owned(), vec![folder_summary("fb")]),
            ("folders/fb".to_owned(), vec![folder_summary("fc")]),
            ("folders/fc".to_owned(), vec![folder_summary("fd")]),
        ]),
        ..FakeHierarchy::default()
    });
    let policies = Arc::new(FakePolicySource::default());
    let sink = Arc::new(FakeSink::default());

    let service = build_service(
        hierarchy,
        policies.clone(),
        sink,
        CollectorConfig {
            max_depth: 2,
            ..CollectorConfig::default()
        },
    );
    let summary = service.run(org_ref("org1")).await;

    assert!(summary.is_ok());
    let summary = summary.unwrap_or_else(|_| unreachable!());
    assert_eq!(summary.resources_discovered, 3);
    assert_eq!(summary.listing_errors, 1);
    assert_eq!(summary.abandoned_subtrees, 1);

    let fetched = policies.fetch_log.lock().await.clone();
    assert!(!fetched.contains(&"folders/fc".to_owned()));
}

#[tokio::test]
async fn run_rejects_non_organization_root() {
    let hierarchy = Arc::new(FakeHierarchy::default());
    let policies = Arc::new(FakePolicySource::default());
    let sink = Arc::new(FakeSink::default());

    let service = build_service(hierarchy, policies, sink, CollectorConfig::default());
    let folder = ResourceRef::folder("f1", "org1").unwrap_or_else(|_| unreachable!());

    assert!(service.run(folder).await.is_err());
}

#[tokio::test]
async fn config_rejects_zero_workers() {
    let hierarchy: Arc<FakeHierarchy> = Arc::new(FakeHierarchy::default());
    let policies: Arc<FakePolicySource> = Arc::new(FakePolicySource::default());
    let sink: Arc<FakeSink> = Arc::new(FakeSink::default());

    let result = CollectorService::new(
        hierarchy,
        policies,
        sink,
        CollectorConfig {
            worker_count: 0,
            ..CollectorConfig::default()
        },
    );

    assert!(result.is_err());
}
