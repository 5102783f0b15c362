//! HTTP implementation of the cloud store client

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{
    CloudCredentials, CloudUsage, Permissions, StoreClient, StoreConnector, StoreError, StoredVideo,
};

/// Response from the auth endpoint
#[derive(Debug, Deserialize)]
struct AuthResponse {
    read: bool,
    write: bool,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    used: u64,
    quota: u64,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    videos: Vec<StoredVideo>,
}

#[derive(Debug, Serialize)]
struct TagRequest<'a> {
    tag: &'a str,
}

#[derive(Debug, Serialize)]
struct ProtectRequest {
    protected: bool,
}

/// Parse a store endpoint, accepting only absolute http(s) URLs
pub fn parse_endpoint(endpoint: &str) -> Result<Url, StoreError> {
    let invalid = || StoreError::InvalidEndpoint(endpoint.to_string());
    let url = Url::parse(endpoint.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(invalid());
    }
    Ok(url)
}

fn request_error(error: reqwest::Error) -> StoreError {
    if error.is_builder() {
        StoreError::InvalidRequest(error.to_string())
    } else {
        StoreError::Network(error.to_string())
    }
}

/// Connects [`HttpStoreClient`]s
#[derive(Debug, Default)]
pub struct HttpConnector;

impl StoreConnector for HttpConnector {
    fn connect(&self, credentials: &CloudCredentials) -> Result<Arc<dyn StoreClient>, StoreError> {
        Ok(Arc::new(HttpStoreClient::new(credentials.clone())?))
    }
}

/// Store client over the account's REST API
#[derive(Clone)]
pub struct HttpStoreClient {
    client: Client,
    base: Url,
    credentials: CloudCredentials,
}

impl HttpStoreClient {
    pub fn new(credentials: CloudCredentials) -> Result<Self, StoreError> {
        let base = parse_endpoint(&credentials.endpoint)?;
        let client = Client::builder()
            .user_agent(concat!("raidcast-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(request_error)?;

        Ok(Self {
            client,
            base,
            credentials,
        })
    }

    /// `<endpoint>/api/<account>/<segments..>`, each segment percent-encoded
    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidEndpoint(self.credentials.endpoint.clone()))?
            .pop_if_empty()
            .push("api")
            .push(&self.credentials.account)
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.credentials.user, Some(&self.credentials.pass_key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self
            .authed(request)
            .send()
            .await
            .map_err(request_error)?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::Unauthorized),
            status if !status.is_success() => Err(StoreError::Status(status.as_u16())),
            _ => Ok(response),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, StoreError> {
        let response = self.send(self.client.get(self.url(&[path])?)).await?;
        response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[async_trait]
impl StoreClient for HttpStoreClient {
    async fn check_auth(&self) -> Result<Permissions, StoreError> {
        debug!("Checking cloud credentials for {}", self.credentials.account);
        let auth: AuthResponse = self.get_json("auth").await?;
        Ok(Permissions {
            read: auth.read,
            write: auth.write,
        })
    }

    async fn usage(&self) -> Result<CloudUsage, StoreError> {
        let usage: UsageResponse = self.get_json("usage").await?;
        Ok(CloudUsage {
            used_bytes: usage.used,
            quota_bytes: usage.quota,
        })
    }

    async fn list(&self) -> Result<Vec<StoredVideo>, StoreError> {
        let list: VideoListResponse = self.get_json("videos").await?;
        Ok(list.videos)
    }

    async fn tag(&self, name: &str, tag: &str) -> Result<(), StoreError> {
        let request = self
            .client
            .post(self.url(&["videos", name, "tag"])?)
            .json(&TagRequest { tag });
        self.send(request).await.map(|_| ())
    }

    async fn protect(&self, name: &str, protected: bool) -> Result<(), StoreError> {
        let request = self
            .client
            .post(self.url(&["videos", name, "protect"])?)
            .json(&ProtectRequest { protected });
        self.send(request).await.map(|_| ())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let request = self.client.delete(self.url(&["videos", name])?);
        self.send(request).await.map(|_| ())
    }
}
