//! HTTP adapters for the Splitter (outbound) and project description (inbound) ports, grounded on
//! `codegraph-ai`'s `OpenAICompatibleProvider`: a thin `reqwest::Client` wrapper configured once at
//! construction, one request method per port method, no retry logic here — retries are the
//! Splitter Driver's job (`splitter.rs`), not the transport's.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use codegraph_core::domain::ProjectId;
use codegraph_core::error::{Categorized, ErrorCategory};
use codegraph_core::ports::{ProjectDescriptionSource, SplitterClient, SplitterRequest, SplitterResponse};

#[derive(Debug, Error)]
pub enum HttpAdapterError {
    #[error("request to {url} timed out or failed to connect: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to decode response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl Categorized for HttpAdapterError {
    fn category(&self) -> ErrorCategory {
        match self {
            HttpAdapterError::Connect { .. } => ErrorCategory::Transient,
            HttpAdapterError::Status { status, .. } if *status >= 500 => ErrorCategory::Transient,
            HttpAdapterError::Status { .. } => ErrorCategory::Permanent,
            HttpAdapterError::Decode { .. } => ErrorCategory::Permanent,
        }
    }
}

/// Calls an external Splitter service over HTTP: `POST {base_url}/split` with a `SplitterRequest`
/// body, expecting a `SplitterResponse` body back.
pub struct HttpSplitterClient {
    client: Client,
    base_url: String,
}

impl HttpSplitterClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(timeout_secs)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl SplitterClient for HttpSplitterClient {
    type Error = HttpAdapterError;

    async fn split(&self, request: SplitterRequest) -> Result<SplitterResponse, Self::Error> {
        let url = format!("{}/split", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|source| HttpAdapterError::Connect { url: url.clone(), source })?;

        if !response.status().is_success() {
            return Err(HttpAdapterError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        response
            .json::<SplitterResponse>()
            .await
            .map_err(|source| HttpAdapterError::Decode { url, source })
    }
}

/// Calls an external project-metadata service over HTTP: `GET {base_url}/projects/{id}/description`.
/// A `404` is not an error — it means the project has no description recorded, per the port's
/// `Option<String>` return shape.
pub struct HttpProjectDescriptionSource {
    client: Client,
    base_url: String,
}

impl HttpProjectDescriptionSource {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(timeout_secs)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ProjectDescriptionSource for HttpProjectDescriptionSource {
    type Error = HttpAdapterError;

    async fn description(&self, project_id: ProjectId) -> Result<Option<String>, Self::Error> {
        let url = format!("{}/projects/{}/description", self.base_url, project_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| HttpAdapterError::Connect { url: url.clone(), source })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(HttpAdapterError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        #[derive(serde::Deserialize)]
        struct Body {
            description: Option<String>,
        }
        let body: Body = response
            .json()
            .await
            .map_err(|source| HttpAdapterError::Decode { url, source })?;
        Ok(body.description)
    }
}
