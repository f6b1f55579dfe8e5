//! Capability ports consumed by the collector core.

mod hierarchy;
mod policy;
mod sink;

pub use hierarchy::{
    FolderSummary, HierarchySource, ListingError, ListingErrorKind, ProjectSummary,
};
pub use policy::{FetchError, FetchErrorKind, PolicySource};
pub use sink::{
    ColumnMode, ColumnType, PolicyColumn, PolicySink, PolicyTableSchema, RowAppendError, SinkError,
};
