use async_trait::async_trait;
use orglens_core::{AppResult, NonEmptyString};

/// Credential capability for outbound cloud API calls.
///
/// The credential mechanism itself is external; adapters only need a bearer
/// token valid for the next request.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Returns a bearer token for the next request.
    async fn access_token(&self) -> AppResult<String>;
}

/// Token provider backed by a pre-issued token handed in at startup.
pub struct StaticAccessTokenProvider {
    token: NonEmptyString,
}

impl StaticAccessTokenProvider {
    /// Creates a provider from one pre-issued token.
    pub fn new(token: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            token: NonEmptyString::new(token)?,
        })
    }
}

#[async_trait]
impl AccessTokenProvider for StaticAccessTokenProvider {
    async fn access_token(&self) -> AppResult<String> {
        Ok(self.token.as_str().to_owned())
    }
}
