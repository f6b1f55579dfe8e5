use async_trait::async_trait;
use orglens_core::AppResult;
use orglens_domain::PolicyRow;
use thiserror::Error;

/// Column value type understood by the analytical sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// UTF-8 string column.
    String,
    /// Calendar date column.
    Date,
}

/// Column nullability mode understood by the analytical sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnMode {
    /// Value required on every row.
    Required,
    /// Value may be absent.
    Nullable,
}

/// One column of the sink table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyColumn {
    /// Column name, matching the `PolicyRow` serialized field.
    pub name: &'static str,
    /// Column value type.
    pub column_type: ColumnType,
    /// Column nullability.
    pub mode: ColumnMode,
}

/// Schema of the policy row table provisioned before traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTableSchema {
    columns: Vec<PolicyColumn>,
}

impl PolicyTableSchema {
    /// Returns the schema for aggregated policy rows.
    #[must_use]
    pub fn policy_rows() -> Self {
        Self {
            columns: vec![
                PolicyColumn {
                    name: "project_id",
                    column_type: ColumnType::String,
                    mode: ColumnMode::Nullable,
                },
                PolicyColumn {
                    name: "folder_id",
                    column_type: ColumnType::String,
                    mode: ColumnMode::Nullable,
                },
                PolicyColumn {
                    name: "organization_id",
                    column_type: ColumnType::String,
                    mode: ColumnMode::Nullable,
                },
                PolicyColumn {
                    name: "member_email",
                    column_type: ColumnType::String,
                    mode: ColumnMode::Required,
                },
                PolicyColumn {
                    name: "role",
                    column_type: ColumnType::String,
                    mode: ColumnMode::Required,
                },
                PolicyColumn {
                    name: "date",
                    column_type: ColumnType::Date,
                    mode: ColumnMode::Required,
                },
            ],
        }
    }

    /// Returns the ordered column list.
    #[must_use]
    pub fn columns(&self) -> &[PolicyColumn] {
        self.columns.as_slice()
    }
}

/// One row rejected by the sink inside an otherwise accepted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowAppendError {
    /// Index of the rejected row within the submitted batch.
    pub row_index: usize,
    /// Rejection message reported by the sink.
    pub message: String,
}

/// The sink was unreachable for an entire batch.
#[derive(Debug, Clone, Error)]
#[error("sink unavailable: {message}")]
pub struct SinkError {
    /// Underlying message from the sink.
    pub message: String,
}

/// External analytical sink capability.
#[async_trait]
pub trait PolicySink: Send + Sync {
    /// Provisions the target table idempotently; called once before traversal.
    async fn ensure_schema(&self, schema: &PolicyTableSchema) -> AppResult<()>;

    /// Appends one resource's rows.
    ///
    /// `Ok` carries per-row rejections (possibly empty) without losing the
    /// rows that succeeded; `Err` means the sink was unavailable for the
    /// whole batch.
    async fn append_rows(&self, rows: &[PolicyRow]) -> Result<Vec<RowAppendError>, SinkError>;
}

#[cfg(test)]
mod tests {
    use super::{ColumnMode, ColumnType, PolicyTableSchema};

    #[test]
    fn policy_row_schema_matches_output_columns() {
        let schema = PolicyTableSchema::policy_rows();
        let names: Vec<&str> = schema.columns().iter().map(|column| column.name).collect();

        assert_eq!(
            names,
            vec!["project_id", "folder_id", "organization_id", "member_email", "role", "date"]
        );
    }

    #[test]
    fn identity_and_date_columns_are_required() {
        let schema = PolicyTableSchema::policy_rows();

        for column in schema.columns() {
            let expected_mode = match column.name {
                "member_email" | "role" | "date" => ColumnMode::Required,
                _ => ColumnMode::Nullable,
            };
            assert_eq!(column.mode, expected_mode, "column {}", column.name);
        }

        let date = schema
            .columns()
            .iter()
            .find(|column| column.name == "date")
            .map(|column| column.column_type);
        assert_eq!(date, Some(ColumnType::Date));
    }
}
