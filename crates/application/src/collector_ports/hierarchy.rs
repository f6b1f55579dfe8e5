use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use orglens_domain::ResourceRef;
use thiserror::Error;

/// One child folder returned by the hierarchy-listing API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSummary {
    /// Folder identifier, unique among folders.
    pub id: String,
    /// Optional human-friendly name, used for logging only.
    pub display_name: Option<String>,
}

/// One child project returned by the hierarchy-listing API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSummary {
    /// Project identifier, unique among projects.
    pub id: String,
}

/// Failure category for a child-listing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingErrorKind {
    /// The call may succeed if repeated.
    Transient,
    /// Repeating the call will not help.
    Permanent,
}

impl ListingErrorKind {
    /// Returns a stable log value for this category.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

impl Display for ListingErrorKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.as_str())
    }
}

/// Failed child listing; abandons only the affected subtree.
#[derive(Debug, Clone, Error)]
#[error("{kind} listing error under {parent_name}: {message}")]
pub struct ListingError {
    /// REST resource name of the parent whose children could not be listed.
    pub parent_name: String,
    /// Transient or permanent classification.
    pub kind: ListingErrorKind,
    /// Underlying message from the hierarchy API.
    pub message: String,
}

/// External hierarchy-listing capability.
#[async_trait]
pub trait HierarchySource: Send + Sync {
    /// Lists child folders of an organization or folder.
    async fn list_child_folders(
        &self,
        parent: &ResourceRef,
    ) -> Result<Vec<FolderSummary>, ListingError>;

    /// Lists projects whose direct parent is the given node.
    async fn list_child_projects(
        &self,
        parent: &ResourceRef,
    ) -> Result<Vec<ProjectSummary>, ListingError>;
}
