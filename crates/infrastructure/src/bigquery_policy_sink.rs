use std::sync::Arc;

use async_trait::async_trait;
use orglens_application::{
    ColumnMode, ColumnType, PolicySink, PolicyTableSchema, RowAppendError, SinkError,
};
use orglens_core::{AppError, AppResult};
use orglens_domain::PolicyRow;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::access_token::AccessTokenProvider;

/// HTTP adapter appending policy rows to a BigQuery table.
///
/// Provisioning is idempotent: dataset and table are created only when the
/// lookup returns 404, and a create racing another writer is treated as
/// already provisioned.
pub struct BigQueryPolicySink {
    http_client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenProvider>,
    project_id: String,
    dataset_id: String,
    table_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct InsertErrorEntry {
    index: usize,
    #[serde(default)]
    errors: Vec<InsertErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct InsertErrorDetail {
    #[serde(default)]
    message: String,
}

impl BigQueryPolicySink {
    /// Production endpoint of the BigQuery API.
    pub const DEFAULT_BASE_URL: &'static str = "https://bigquery.googleapis.com";

    /// Creates a sink writing to `project.dataset.table`.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            tokens,
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    fn dataset_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/datasets",
            self.base_url, self.project_id
        )
    }

    fn table_url(&self) -> String {
        format!("{}/{}/tables", self.dataset_url(), self.dataset_id)
    }

    async fn ensure_dataset(&self, token: &str) -> AppResult<()> {
        let lookup = self
            .http_client
            .get(format!("{}/{}", self.dataset_url(), self.dataset_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| AppError::Internal(format!("dataset lookup failed: {error}")))?;

        match lookup.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                let created = self
                    .http_client
                    .post(self.dataset_url())
                    .bearer_auth(token)
                    .json(&json!({
                        "datasetReference": {
                            "projectId": self.project_id,
                            "datasetId": self.dataset_id,
                        }
                    }))
                    .send()
                    .await
                    .map_err(|error| {
                        AppError::Internal(format!("dataset creation failed: {error}"))
                    })?;

                if created.status().is_success() || created.status() == StatusCode::CONFLICT {
                    info!(dataset = %self.dataset_id, "created BigQuery dataset");
                    Ok(())
                } else {
                    Err(provisioning_error("dataset creation", created).await)
                }
            }
            _ => Err(provisioning_error("dataset lookup", lookup).await),
        }
    }

    async fn ensure_table(&self, token: &str, schema: &PolicyTableSchema) -> AppResult<()> {
        let lookup = self
            .http_client
            .get(format!("{}/{}", self.table_url(), self.table_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| AppError::Internal(format!("table lookup failed: {error}")))?;

        match lookup.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                let created = self
                    .http_client
                    .post(self.table_url())
                    .bearer_auth(token)
                    .json(&json!({
                        "tableReference": {
                            "projectId": self.project_id,
                            "datasetId": self.dataset_id,
                            "tableId": self.table_id,
                        },
                        "schema": { "fields": schema_fields(schema) }
                    }))
                    .send()
                    .await
                    .map_err(|error| {
                        AppError::Internal(format!("table creation failed: {error}"))
                    })?;

                if created.status().is_success() || created.status() == StatusCode::CONFLICT {
                    info!(table = %self.table_id, "created BigQuery table");
                    Ok(())
                } else {
                    Err(provisioning_error("table creation", created).await)
                }
            }
            _ => Err(provisioning_error("table lookup", lookup).await),
        }
    }
}

#[async_trait]
impl PolicySink for BigQueryPolicySink {
    async fn ensure_schema(&self, schema: &PolicyTableSchema) -> AppResult<()> {
        let token = self.tokens.access_token().await?;
        self.ensure_dataset(token.as_str()).await?;
        self.ensure_table(token.as_str(), schema).await
    }

    async fn append_rows(&self, rows: &[PolicyRow]) -> Result<Vec<RowAppendError>, SinkError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let token = self.tokens.access_token().await.map_err(|error| SinkError {
            message: format!("failed to obtain access token: {error}"),
        })?;

        let body = insert_all_body(rows).map_err(|error| SinkError {
            message: format!("failed to encode rows: {error}"),
        })?;

        let response = self
            .http_client
            .post(format!("{}/{}/insertAll", self.table_url(), self.table_id))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|error| SinkError {
                message: format!("insert transport error: {error}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_owned());
            return Err(SinkError {
                message: format!("insert returned status {}: {body}", status.as_u16()),
            });
        }

        let parsed = response
            .json::<InsertAllResponse>()
            .await
            .map_err(|error| SinkError {
                message: format!("failed to parse insert response: {error}"),
            })?;

        debug!(
            table = %self.table_id,
            rows = rows.len(),
            rejected = parsed.insert_errors.len(),
            "appended policy rows"
        );
        Ok(row_append_errors(parsed))
    }
}

async fn provisioning_error(operation: &str, response: reqwest::Response) -> AppError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_owned());
    let message = format!("{operation} returned status {}: {body}", status.as_u16());

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        AppError::Unauthorized(message)
    } else {
        AppError::Internal(message)
    }
}

fn schema_fields(schema: &PolicyTableSchema) -> Vec<Value> {
    schema
        .columns()
        .iter()
        .map(|column| {
            json!({
                "name": column.name,
                "type": match column.column_type {
                    ColumnType::String => "STRING",
                    ColumnType::Date => "DATE",
                },
                "mode": match column.mode {
                    ColumnMode::Required => "REQUIRED",
                    ColumnMode::Nullable => "NULLABLE",
                },
            })
        })
        .collect()
}

fn insert_all_body(rows: &[PolicyRow]) -> Result<Value, serde_json::Error> {
    let encoded = rows
        .iter()
        .map(|row| serde_json::to_value(row).map(|json| json!({ "json": json })))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({ "rows": encoded }))
}

fn row_append_errors(response: InsertAllResponse) -> Vec<RowAppendError> {
    response
        .insert_errors
        .into_iter()
        .map(|entry| RowAppendError {
            row_index: entry.index,
            message: entry
                .errors
                .into_iter()
                .map(|detail| detail.message)
                .filter(|message| !message.is_empty())
                .collect::<Vec<_>>()
                .join("; "),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use orglens_domain::PolicyRow;
    use serde_json::json;

    use super::{InsertAllResponse, insert_all_body, row_append_errors, schema_fields};
    use orglens_application::PolicyTableSchema;

    fn sample_row() -> PolicyRow {
        PolicyRow {
            project_id: Some("p1".to_owned()),
            folder_id: None,
            organization_id: None,
            member_email: "user:a@example.com".to_owned(),
            role: "roles/editor,roles/viewer".to_owned(),
            date: NaiveDate::from_ymd_opt(2026, 8, 6).unwrap_or_else(|| unreachable!()),
        }
    }

    #[test]
    fn schema_fields_use_bigquery_type_names() {
        let fields = schema_fields(&PolicyTableSchema::policy_rows());

        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0]["name"], "project_id");
        assert_eq!(fields[0]["mode"], "NULLABLE");
        assert_eq!(fields[5]["name"], "date");
        assert_eq!(fields[5]["type"], "DATE");
        assert_eq!(fields[5]["mode"], "REQUIRED");
    }

    #[test]
    fn rows_encode_with_table_column_names() {
        let body = insert_all_body(&[sample_row()]);

        assert!(body.is_ok());
        let body = body.unwrap_or_else(|_| unreachable!());
        let row = &body["rows"][0]["json"];
        assert_eq!(row["project_id"], "p1");
        assert_eq!(row["folder_id"], json!(null));
        assert_eq!(row["member_email"], "user:a@example.com");
        assert_eq!(row["role"], "roles/editor,roles/viewer");
        assert_eq!(row["date"], "2026-08-06");
    }

    #[test]
    fn insert_errors_map_to_row_rejections() {
        let response: Result<InsertAllResponse, _> = serde_json::from_value(json!({
            "kind": "bigquery#tableDataInsertAllResponse",
            "insertErrors": [
                {"index": 1, "errors": [{"message": "no such field"}, {"message": "stopped"}]}
            ]
        }));

        assert!(response.is_ok());
        let rejections = row_append_errors(response.unwrap_or_else(|_| unreachable!()));
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].row_index, 1);
        assert_eq!(rejections[0].message, "no such field; stopped");
    }

    #[test]
    fn insert_response_without_errors_is_clean() {
        let response: Result<InsertAllResponse, _> = serde_json::from_value(json!({}));
        assert!(response.is_ok_and(|parsed| row_append_errors(parsed).is_empty()));
    }
}
