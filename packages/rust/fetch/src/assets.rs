//! HTTP asset source for the renderer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use dossier_render::AssetFetcher;
use dossier_shared::{AssetError, DossierError};

use crate::osf::USER_AGENT;

/// Downloads asset tokens, which are plain URLs.
#[derive(Debug, Clone)]
pub struct HttpAssetFetcher {
    client: Client,
    token: Option<String>,
    max_bytes: u64,
}

impl HttpAssetFetcher {
    /// `max_bytes` caps a single download; larger bodies fail the asset.
    pub fn new(
        token: Option<String>,
        timeout: Duration,
        max_bytes: u64,
    ) -> dossier_shared::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| DossierError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            token,
            max_bytes,
        })
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, token: &str) -> Result<Vec<u8>, AssetError> {
        let url = Url::parse(token)
            .map_err(|e| AssetError::Failed(format!("invalid asset URL '{token}': {e}")))?;

        let mut request = self.client.get(url.clone());
        if let Some(bearer) = &self.token {
            request = request.bearer_auth(bearer);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AssetError::Failed(format!("{url}: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(AssetError::NotFound(url.to_string())),
            status if !status.is_success() => {
                return Err(AssetError::Failed(format!("{url}: HTTP {status}")));
            }
            _ => {}
        }

        if let Some(len) = response.content_length().filter(|len| *len > self.max_bytes) {
            return Err(AssetError::Failed(format!(
                "{url}: {len} bytes exceeds the {} byte limit",
                self.max_bytes
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AssetError::Failed(format!("{url}: failed to read body: {e}")))?;
        if body.len() as u64 > self.max_bytes {
            return Err(AssetError::Failed(format!(
                "{url}: {} bytes exceeds the {} byte limit",
                body.len(),
                self.max_bytes
            )));
        }
        debug!(%url, bytes = body.len(), "asset downloaded");
        Ok(body.to_vec())
    }
}
