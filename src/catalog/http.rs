use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use data_model::{CatalogDocument, DocumentDescriptor, DocumentId, OwnerId};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};
use url::Url;

use super::{CatalogError, Deletion, MetadataCatalog};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// Every catalog response wraps its payload in `{"data": ...}`.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct OptionalEnvelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    message: Option<String>,
}

pub struct HttpMetadataCatalogBuilder {
    base_url: String,
    timeout: Duration,
}

impl HttpMetadataCatalogBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpMetadataCatalog> {
        let base_url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid catalog base_url {:?}", self.base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("catalog base_url {:?} cannot carry a path", self.base_url);
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .context("unable to build catalog http client")?;
        Ok(HttpMetadataCatalog { client, base_url })
    }
}

/// Client for the external document catalog service.
#[derive(Debug, Clone)]
pub struct HttpMetadataCatalog {
    client: Client,
    base_url: Url,
}

impl HttpMetadataCatalog {
    pub fn builder(base_url: impl Into<String>) -> HttpMetadataCatalogBuilder {
        HttpMetadataCatalogBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Appends `segments` to the base URL, percent-encoding each one so an id
    /// can never add path segments, a query or a fragment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, CatalogError> {
        // `.` and `..` would be dropped by the URL serializer.
        if let Some(bad) = segments
            .iter()
            .find(|s| s.is_empty() || **s == "." || **s == "..")
        {
            return Err(CatalogError::InvalidIdentifier(bad.to_string()));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CatalogError::Transport("catalog base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, CatalogError> {
        request
            .send()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))
    }

    async fn read_data<T: DeserializeOwned>(response: Response) -> Result<T, CatalogError> {
        let response = Self::check_status(response).await?;
        let envelope = response
            .json::<Envelope<T>>()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        Ok(envelope.data)
    }

    async fn check_status(response: Response) -> Result<Response, CatalogError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<ErrorEnvelope>().await {
            Ok(ErrorEnvelope {
                message: Some(message),
            }) => message,
            _ => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        Err(CatalogError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl MetadataCatalog for HttpMetadataCatalog {
    async fn create(&self, descriptor: &DocumentDescriptor) -> Result<CatalogDocument, CatalogError> {
        debug!(filename = %descriptor.filename, "creating catalog record");
        let response = self
            .send(self.client.post(self.base_url.clone()).json(descriptor))
            .await?;
        Self::read_data(response).await
    }

    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<CatalogDocument>, CatalogError> {
        let owner = owner.to_string();
        let url = self.endpoint(&["users", &owner])?;
        let response = self.send(self.client.get(url)).await?;
        Self::read_data(response).await
    }

    async fn search(
        &self,
        owner: &OwnerId,
        term: &str,
    ) -> Result<Vec<CatalogDocument>, CatalogError> {
        let owner = owner.to_string();
        let url = self.endpoint(&["user", &owner, "search"])?;
        let response = self
            .send(self.client.get(url).query(&[("term", term)]))
            .await?;
        Self::read_data(response).await
    }

    async fn count(&self, owner: &OwnerId) -> Result<u64, CatalogError> {
        let owner = owner.to_string();
        let url = self.endpoint(&["user", &owner, "count"])?;
        let response = self.send(self.client.get(url)).await?;
        Self::read_data(response).await
    }

    async fn delete(&self, id: &DocumentId) -> Result<Deletion, CatalogError> {
        let raw_id = id.to_string();
        let url = self.endpoint(&["by-id", &raw_id])?;
        let response = self.send(self.client.delete(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Deletion::NotFound);
        }
        let response = Self::check_status(response).await?;
        // Any 2xx means the record is gone, whether or not it is echoed back.
        let body = response
            .bytes()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        let echoed = serde_json::from_slice::<OptionalEnvelope<CatalogDocument>>(&body)
            .ok()
            .and_then(|envelope| envelope.data);
        Ok(match echoed {
            Some(document) => Deletion::Removed(document),
            None => {
                warn!(%id, "catalog deleted the record without returning it");
                Deletion::RemovedUnreported
            }
        })
    }
}
