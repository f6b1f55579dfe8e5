//! Orglens policy snapshot collector runtime.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use orglens_application::{CollectorConfig, CollectorService};
use orglens_core::{AppError, AppResult};
use orglens_domain::ResourceRef;
use orglens_infrastructure::{
    AccessTokenProvider, BigQueryPolicySink, ResourceManagerClient, StaticAccessTokenProvider,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Debug, Clone)]
struct CollectorAppConfig {
    organization_id: String,
    worker_count: usize,
    max_depth: u32,
    transient_retry_attempts: u32,
    retry_backoff_ms: u64,
    bq_project_id: String,
    bq_dataset_name: String,
    bq_table_name: String,
    access_token: String,
    resource_manager_base_url: Option<String>,
    bigquery_base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = CollectorAppConfig::load()?;
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

    let tokens: Arc<dyn AccessTokenProvider> =
        Arc::new(StaticAccessTokenProvider::new(config.access_token.as_str())?);
    let resource_manager = Arc::new(ResourceManagerClient::new(
        http_client.clone(),
        config
            .resource_manager_base_url
            .clone()
            .unwrap_or_else(|| ResourceManagerClient::DEFAULT_BASE_URL.to_owned()),
        tokens.clone(),
    ));
    let sink = Arc::new(BigQueryPolicySink::new(
        http_client,
        config
            .bigquery_base_url
            .clone()
            .unwrap_or_else(|| BigQueryPolicySink::DEFAULT_BASE_URL.to_owned()),
        tokens,
        config.bq_project_id.as_str(),
        config.bq_dataset_name.as_str(),
        config.bq_table_name.as_str(),
    ));

    let service = CollectorService::new(
        resource_manager.clone(),
        resource_manager,
        sink,
        CollectorConfig {
            worker_count: config.worker_count,
            max_depth: config.max_depth,
            transient_retry_attempts: config.transient_retry_attempts,
            retry_backoff_ms: config.retry_backoff_ms,
        },
    )?;

    let root = ResourceRef::organization(config.organization_id.as_str())?;
    info!(
        organization = %root,
        worker_count = config.worker_count,
        dataset = %config.bq_dataset_name,
        table = %config.bq_table_name,
        "orglens-collector started"
    );

    let summary = service.run(root).await?;

    info!(
        run_id = %summary.run_id,
        resources_discovered = summary.resources_discovered,
        resources_processed = summary.resources_processed,
        rows_written = summary.rows_written,
        rows_rejected = summary.rows_rejected,
        fetch_errors = summary.fetch_errors,
        sink_errors = summary.sink_errors,
        listing_errors = summary.listing_errors,
        abandoned_subtrees = summary.abandoned_subtrees,
        "collection summary"
    );

    if summary.worker_failures > 0 {
        warn!(
            worker_failures = summary.worker_failures,
            "some workers terminated abnormally"
        );
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

impl CollectorAppConfig {
    fn load() -> AppResult<Self> {
        let organization_id = required_env("ORGANIZATION_ID")?;
        let worker_count = parse_env_usize("WORKER_COUNT", 5)?;
        let max_depth = parse_env_u32("MAX_DEPTH", 32)?;
        let transient_retry_attempts = parse_env_u32("TRANSIENT_RETRY_ATTEMPTS", 0)?;
        let retry_backoff_ms = parse_env_u64("RETRY_BACKOFF_MS", 200)?;
        let bq_project_id = required_env("BQ_PROJECT_ID")?;
        let bq_dataset_name = required_env("BQ_DATASET_NAME")?;
        let bq_table_name = required_env("BQ_TABLE_NAME")?;
        let access_token = required_env("GOOGLE_ACCESS_TOKEN")?;
        let resource_manager_base_url = optional_base_url("RESOURCE_MANAGER_BASE_URL")?;
        let bigquery_base_url = optional_base_url("BIGQUERY_BASE_URL")?;

        if worker_count == 0 {
            return Err(AppError::Validation(
                "WORKER_COUNT must be greater than zero".to_owned(),
            ));
        }

        if max_depth == 0 {
            return Err(AppError::Validation(
                "MAX_DEPTH must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            organization_id,
            worker_count,
            max_depth,
            transient_retry_attempts,
            retry_backoff_ms,
            bq_project_id,
            bq_dataset_name,
            bq_table_name,
            access_token,
            resource_manager_base_url,
            bigquery_base_url,
        })
    }
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn optional_base_url(name: &str) -> AppResult<Option<String>> {
    match env::var(name) {
        Ok(value) => {
            let parsed = Url::parse(value.trim()).map_err(|error| {
                AppError::Validation(format!("invalid {name} value '{value}': {error}"))
            })?;
            Ok(Some(parsed.as_str().trim_end_matches('/').to_owned()))
        }
        Err(_) => Ok(None),
    }
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
