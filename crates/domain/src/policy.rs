use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use orglens_core::{AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

use crate::resource::{ResourceKind, ResourceRef};

/// One raw access-control binding: a role and the members holding it.
///
/// Bindings are external read-only input; adapters construct them from the
/// policy API wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    role: NonEmptyString,
    members: Vec<String>,
}

impl Binding {
    /// Creates a validated binding.
    pub fn new(role: impl Into<String>, members: Vec<String>) -> AppResult<Self> {
        Ok(Self {
            role: NonEmptyString::new(role)?,
            members,
        })
    }

    /// Returns the role name.
    #[must_use]
    pub fn role(&self) -> &str {
        self.role.as_str()
    }

    /// Returns the member identifiers holding the role.
    #[must_use]
    pub fn members(&self) -> &[String] {
        self.members.as_slice()
    }
}

/// Classification of a binding member by its identity prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    /// Human account, `user:` prefix.
    User,
    /// Machine account, `serviceAccount:` prefix.
    ServiceAccount,
    /// Group identity, `group:` prefix.
    Group,
    /// Any other member tag, including `deleted:` forms.
    Other,
}

impl PrincipalKind {
    /// Classifies one member identifier by exact prefix.
    #[must_use]
    pub fn of_member(member: &str) -> Self {
        if member.starts_with("user:") {
            Self::User
        } else if member.starts_with("serviceAccount:") {
            Self::ServiceAccount
        } else if member.starts_with("group:") {
            Self::Group
        } else {
            Self::Other
        }
    }

    /// Returns whether aggregation keeps members of this kind.
    #[must_use]
    pub fn is_retained(&self) -> bool {
        matches!(self, Self::User | Self::ServiceAccount)
    }
}

/// One output row: the roles one principal holds on one resource.
///
/// Field names match the sink table columns; exactly one of the three
/// resource id columns is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRow {
    /// Populated for project resources.
    pub project_id: Option<String>,
    /// Populated for folder resources.
    pub folder_id: Option<String>,
    /// Populated for organization resources.
    pub organization_id: Option<String>,
    /// Full member identifier, prefix included.
    pub member_email: String,
    /// Comma-joined sorted distinct role set.
    pub role: String,
    /// UTC calendar date the policy was collected.
    pub date: NaiveDate,
}

/// Aggregates raw bindings for one resource into per-principal rows.
///
/// Roles are unioned per member across all bindings; only `user:` and
/// `serviceAccount:` members are retained. Output is deterministic for
/// reproducible runs: rows are sorted by member and each row's roles are
/// sorted before joining with `,`. An empty binding slice yields no rows.
#[must_use]
pub fn aggregate_bindings(
    resource: &ResourceRef,
    bindings: &[Binding],
    collected_on: NaiveDate,
) -> Vec<PolicyRow> {
    let mut member_roles: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for binding in bindings {
        for member in binding.members() {
            if PrincipalKind::of_member(member).is_retained() {
                member_roles
                    .entry(member.as_str())
                    .or_default()
                    .insert(binding.role());
            }
        }
    }

    member_roles
        .into_iter()
        .map(|(member, roles)| PolicyRow {
            project_id: id_for_kind(resource, ResourceKind::Project),
            folder_id: id_for_kind(resource, ResourceKind::Folder),
            organization_id: id_for_kind(resource, ResourceKind::Organization),
            member_email: member.to_owned(),
            role: roles.into_iter().collect::<Vec<_>>().join(","),
            date: collected_on,
        })
        .collect()
}

fn id_for_kind(resource: &ResourceRef, kind: ResourceKind) -> Option<String> {
    (resource.kind() == kind).then(|| resource.id().to_owned())
}
