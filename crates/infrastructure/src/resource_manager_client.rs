use std::sync::Arc;

use async_trait::async_trait;
use orglens_application::{
    FetchError, FetchErrorKind, FolderSummary, HierarchySource, ListingError, ListingErrorKind,
    PolicySource, ProjectSummary,
};
use orglens_domain::{Binding, ResourceRef};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::access_token::AccessTokenProvider;

/// HTTP adapter for the Cloud Resource Manager v3 REST surface.
///
/// Implements both hierarchy listing and policy retrieval; pagination is
/// followed transparently.
pub struct ResourceManagerClient {
    http_client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFoldersResponse {
    #[serde(default)]
    folders: Vec<FolderResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderResource {
    name: String,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListProjectsResponse {
    #[serde(default)]
    projects: Vec<ProjectResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResource {
    project_id: String,
}

#[derive(Debug, Deserialize)]
struct PolicyResponse {
    #[serde(default)]
    bindings: Vec<BindingResource>,
}

#[derive(Debug, Deserialize)]
struct BindingResource {
    role: String,
    #[serde(default)]
    members: Vec<String>,
}

impl ResourceManagerClient {
    /// Production endpoint of the Cloud Resource Manager API.
    pub const DEFAULT_BASE_URL: &'static str = "https://cloudresourcemanager.googleapis.com";

    /// Creates a client against the given base URL.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            tokens,
        }
    }

    async fn listing_token(&self, parent: &ResourceRef) -> Result<String, ListingError> {
        self.tokens.access_token().await.map_err(|error| ListingError {
            parent_name: parent.resource_name(),
            kind: ListingErrorKind::Permanent,
            message: format!("failed to obtain access token: {error}"),
        })
    }

    async fn fetch_page<Page: DeserializeOwned>(
        &self,
        parent: &ResourceRef,
        path: &str,
        token: &str,
        page_token: Option<&str>,
    ) -> Result<Page, ListingError> {
        let mut request = self
            .http_client
            .get(format!("{}/v3/{path}", self.base_url))
            .query(&[("parent", parent.resource_name())])
            .bearer_auth(token);
        if let Some(value) = page_token {
            request = request.query(&[("pageToken", value)]);
        }

        let response = request.send().await.map_err(|error| ListingError {
            parent_name: parent.resource_name(),
            kind: ListingErrorKind::Transient,
            message: format!("{path} listing transport error: {error}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_owned());
            return Err(ListingError {
                parent_name: parent.resource_name(),
                kind: listing_error_kind(status),
                message: format!("{path} listing returned status {}: {body}", status.as_u16()),
            });
        }

        response.json::<Page>().await.map_err(|error| ListingError {
            parent_name: parent.resource_name(),
            kind: ListingErrorKind::Permanent,
            message: format!("failed to parse {path} listing response: {error}"),
        })
    }
}

#[async_trait]
impl HierarchySource for ResourceManagerClient {
    async fn list_child_folders(
        &self,
        parent: &ResourceRef,
    ) -> Result<Vec<FolderSummary>, ListingError> {
        let token = self.listing_token(parent).await?;
        let mut results = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: ListFoldersResponse = self
                .fetch_page(parent, "folders", token.as_str(), page_token.as_deref())
                .await?;

            for folder in page.folders {
                match folder_id_from_name(&folder.name) {
                    Some(id) => results.push(FolderSummary {
                        id: id.to_owned(),
                        display_name: folder.display_name,
                    }),
                    None => {
                        warn!(
                            parent = %parent,
                            name = %folder.name,
                            "hierarchy API returned unexpected folder name; skipping"
                        );
                    }
                }
            }

            page_token = page.next_page_token.filter(|value| !value.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        Ok(results)
    }

    async fn list_child_projects(
        &self,
        parent: &ResourceRef,
    ) -> Result<Vec<ProjectSummary>, ListingError> {
        let token = self.listing_token(parent).await?;
        let mut results = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: ListProjectsResponse = self
                .fetch_page(parent, "projects", token.as_str(), page_token.as_deref())
                .await?;

            for project in page.projects {
                results.push(ProjectSummary {
                    id: project.project_id,
                });
            }

            page_token = page.next_page_token.filter(|value| !value.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        Ok(results)
    }
}

#[async_trait]
impl PolicySource for ResourceManagerClient {
    async fn get_iam_policy(&self, resource: &ResourceRef) -> Result<Vec<Binding>, FetchError> {
        let token = self.tokens.access_token().await.map_err(|error| FetchError {
            resource_name: resource.resource_name(),
            kind: FetchErrorKind::Unknown,
            message: format!("failed to obtain access token: {error}"),
        })?;

        let response = self
            .http_client
            .post(format!(
                "{}/v3/{}:getIamPolicy",
                self.base_url,
                resource.resource_name()
            ))
            .bearer_auth(token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|error| FetchError {
                resource_name: resource.resource_name(),
                kind: FetchErrorKind::Transient,
                message: format!("policy fetch transport error: {error}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_owned());
            return Err(FetchError {
                resource_name: resource.resource_name(),
                kind: fetch_error_kind(status),
                message: format!("policy fetch returned status {}: {body}", status.as_u16()),
            });
        }

        let policy = response
            .json::<PolicyResponse>()
            .await
            .map_err(|error| FetchError {
                resource_name: resource.resource_name(),
                kind: FetchErrorKind::Unknown,
                message: format!("failed to parse policy response: {error}"),
            })?;

        let mut bindings = Vec::with_capacity(policy.bindings.len());
        for raw in policy.bindings {
            match Binding::new(raw.role, raw.members) {
                Ok(binding) => bindings.push(binding),
                Err(error) => {
                    warn!(resource = %resource, error = %error, "policy API returned invalid binding; skipping");
                }
            }
        }

        Ok(bindings)
    }
}

fn folder_id_from_name(name: &str) -> Option<&str> {
    name.strip_prefix("folders/").filter(|id| !id.is_empty())
}

fn fetch_error_kind(status: StatusCode) -> FetchErrorKind {
    if status == StatusCode::NOT_FOUND {
        FetchErrorKind::NotFound
    } else if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        FetchErrorKind::PermissionDenied
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FetchErrorKind::Transient
    } else {
        FetchErrorKind::Unknown
    }
}

fn listing_error_kind(status: StatusCode) -> ListingErrorKind {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ListingErrorKind::Transient
    } else {
        ListingErrorKind::Permanent
    }
}
