//! HTTP client for the directory service
//!
//! Endpoints:
//!
//! - `GET {base}/api/v1/directories/{id}` -> `{"directory": {...}}`
//! - `GET {base}/api/v1/directories/{id}/parents` -> `{"directories": [...]}`

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::DirectoryClient;
use crate::types::{DirectoryId, DirectoryNode, LintelError, Result};

#[derive(Debug, Deserialize)]
struct NodeResponse {
    directory: DirectoryNode,
}

#[derive(Debug, Deserialize)]
struct ChainResponse {
    #[serde(default)]
    directories: Vec<DirectoryNode>,
}

/// Directory service client configuration
#[derive(Debug, Clone)]
pub struct HttpDirectoryConfig {
    /// Base URL of the directory service (e.g. "http://directories:8080")
    pub base_url: String,
    /// Deadline for each request
    pub request_timeout: Duration,
}

impl Default for HttpDirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// reqwest-backed directory client
pub struct HttpDirectoryClient {
    config: HttpDirectoryConfig,
    http_client: reqwest::Client,
}

impl HttpDirectoryClient {
    pub fn new(config: HttpDirectoryConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("lintel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LintelError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http_client })
    }

    fn node_url(&self, id: DirectoryId) -> String {
        format!(
            "{}/api/v1/directories/{}",
            self.config.base_url.trim_end_matches('/'),
            id
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "Directory request");

        let response = self
            .http_client
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn get_node(&self, id: DirectoryId) -> Result<DirectoryNode> {
        let body: NodeResponse = self.get_json(&self.node_url(id)).await?;
        if body.directory.deleted {
            return Err(LintelError::NotFound(format!("directory {} is deleted", id)));
        }
        Ok(body.directory)
    }

    async fn get_ancestor_chain(&self, id: DirectoryId) -> Result<Vec<DirectoryNode>> {
        let url = format!("{}/parents", self.node_url(id));
        let body: ChainResponse = self.get_json(&url).await?;
        Ok(body.directories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HttpDirectoryConfig::default();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_node_url_trims_slash() {
        let client = HttpDirectoryClient::new(HttpDirectoryConfig {
            base_url: "http://dirs:9000/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            client.node_url(DirectoryId::from_u128(1)),
            "http://dirs:9000/api/v1/directories/00000000-0000-0000-0000-000000000001"
        );
    }

    #[test]
    fn test_chain_response_parsing() {
        let json = format!(
            r#"{{"directories":[{{"id":"{}","parent":"{}"}},{{"id":"{}"}}]}}"#,
            DirectoryId::from_u128(2),
            DirectoryId::from_u128(1),
            DirectoryId::from_u128(1)
        );
        let body: ChainResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(body.directories.len(), 2);
        assert_eq!(body.directories[1].parent, None);
    }
}
