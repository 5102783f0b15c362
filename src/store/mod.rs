//! Remote store contract
//!
//! The cloud store holds uploaded recordings. The orchestrator only needs to
//! authenticate against it, read usage, list videos and fire off best-effort
//! mutations; the wire protocol lives in [`http`].

mod http;

pub use http::{parse_endpoint, HttpConnector, HttpStoreClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// What the credentials are allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CloudUsage {
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredVideo {
    pub name: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Credentials needed to reach the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudCredentials {
    pub endpoint: String,
    pub user: String,
    pub pass_key: String,
    pub account: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cloud credentials were rejected")]
    Unauthorized,
    #[error("Cloud store unreachable: {0}")]
    Network(String),
    #[error("Cloud store returned HTTP {0}")]
    Status(u16),
    #[error("Unexpected cloud store response: {0}")]
    Decode(String),
    #[error("Cloud store did not respond within {0:?}")]
    Timeout(Duration),
    #[error("Cloud endpoint '{0}' is not a valid http(s) URL")]
    InvalidEndpoint(String),
    #[error("Cloud request could not be built: {0}")]
    InvalidRequest(String),
}

impl StoreError {
    /// Wrong credentials or a malformed endpoint will not fix themselves;
    /// everything else might
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StoreError::Unauthorized | StoreError::InvalidEndpoint(_) | StoreError::InvalidRequest(_)
        )
    }
}

#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn check_auth(&self) -> Result<Permissions, StoreError>;

    async fn usage(&self) -> Result<CloudUsage, StoreError>;

    async fn list(&self) -> Result<Vec<StoredVideo>, StoreError>;

    async fn tag(&self, name: &str, tag: &str) -> Result<(), StoreError>;

    async fn protect(&self, name: &str, protected: bool) -> Result<(), StoreError>;

    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// Builds store clients from credentials
pub trait StoreConnector: Send + Sync {
    fn connect(&self, credentials: &CloudCredentials) -> Result<Arc<dyn StoreClient>, StoreError>;
}
