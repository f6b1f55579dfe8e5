use std::fmt::{Display, Formatter};

use orglens_core::{AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Level of one node in the cloud resource hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// The hierarchy root.
    Organization,
    /// An intermediate container; may hold folders and projects.
    Folder,
    /// A leaf resource; never holds children.
    Project,
}

impl ResourceKind {
    /// Returns a stable storage value for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Folder => "folder",
            Self::Project => "project",
        }
    }

    /// Returns the REST collection segment for this kind.
    #[must_use]
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Organization => "organizations",
            Self::Folder => "folders",
            Self::Project => "projects",
        }
    }
}

/// One unit of hierarchy work: a resource whose policy is collected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    kind: ResourceKind,
    id: NonEmptyString,
    parent_id: Option<String>,
}

impl ResourceRef {
    /// Creates a reference to the organization hierarchy root.
    pub fn organization(id: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            kind: ResourceKind::Organization,
            id: NonEmptyString::new(id)?,
            parent_id: None,
        })
    }

    /// Creates a reference to a folder discovered under the given parent.
    pub fn folder(id: impl Into<String>, parent_id: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            kind: ResourceKind::Folder,
            id: NonEmptyString::new(id)?,
            parent_id: Some(parent_id.into()),
        })
    }

    /// Creates a reference to a project discovered under the given parent.
    pub fn project(id: impl Into<String>, parent_id: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            kind: ResourceKind::Project,
            id: NonEmptyString::new(id)?,
            parent_id: Some(parent_id.into()),
        })
    }

    /// Returns the hierarchy level of this resource.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Returns the opaque identifier, unique within its kind.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Returns the id of the folder or organization that discovered this resource.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Returns the REST resource name, e.g. `folders/123`.
    #[must_use]
    pub fn resource_name(&self) -> String {
        format!("{}/{}", self.kind.collection(), self.id.as_str())
    }

    /// Returns the key enforcing the exactly-once traversal invariant.
    #[must_use]
    pub fn dedup_key(&self) -> (ResourceKind, String) {
        (self.kind, self.id.as_str().to_owned())
    }
}

impl Display for ResourceRef {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.resource_name())
    }
}
