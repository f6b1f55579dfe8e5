//! Infrastructure adapters for collector ports.

#![forbid(unsafe_code)]

mod access_token;
mod bigquery_policy_sink;
mod resource_manager_client;

pub use access_token::{AccessTokenProvider, StaticAccessTokenProvider};
pub use bigquery_policy_sink::BigQueryPolicySink;
pub use resource_manager_client::ResourceManagerClient;
