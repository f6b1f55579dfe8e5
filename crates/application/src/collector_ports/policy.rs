use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use orglens_domain::{Binding, ResourceRef};
use thiserror::Error;

/// Failure category for a policy fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The resource does not exist or is not visible.
    NotFound,
    /// Caller lacks permission to read the policy.
    PermissionDenied,
    /// The call may succeed if repeated.
    Transient,
    /// Unclassified failure.
    Unknown,
}

impl FetchErrorKind {
    /// Returns a stable log value for this category.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::Transient => "transient",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for FetchErrorKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.as_str())
    }
}

/// Failed policy fetch; abandons only that resource's row emission.
#[derive(Debug, Clone, Error)]
#[error("{kind} fetch error for {resource_name}: {message}")]
pub struct FetchError {
    /// REST resource name of the resource whose policy was requested.
    pub resource_name: String,
    /// Error category; retry policy keys off `Transient`.
    pub kind: FetchErrorKind,
    /// Underlying message from the policy API.
    pub message: String,
}

/// External policy-retrieval capability.
///
/// Implementations do not retry internally; retry policy belongs to the
/// work distributor.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Returns the raw access bindings for one resource.
    async fn get_iam_policy(&self, resource: &ResourceRef) -> Result<Vec<Binding>, FetchError>;
}
