//! Collection services and capability ports.

#![forbid(unsafe_code)]

mod collector_ports;
mod collector_service;

pub use collector_ports::{
    ColumnMode, ColumnType, FetchError, FetchErrorKind, FolderSummary, HierarchySource,
    ListingError, ListingErrorKind, PolicyColumn, PolicySink, PolicySource, PolicyTableSchema,
    ProjectSummary, RowAppendError, SinkError,
};
pub use collector_service::{
    CancellationFlag, CollectorConfig, CollectorService, HierarchyWalker, RunSummary, WalkOutcome,
};
