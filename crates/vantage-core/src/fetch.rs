//! Network seam: one request in, one [`Response`] out.
//!
//! Status codes are not interpreted here. A 404 is a successful fetch of a
//! 404 response; only transport failures become errors.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::{DeliveryError, DeliveryResult};
use crate::types::{ResourceRequest, Response};

const USER_AGENT_VALUE: &str = concat!("vantage/", env!("CARGO_PKG_VERSION"));

/// Anything that can turn a request into a response.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &ResourceRequest) -> DeliveryResult<Response>;
}

/// reqwest-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Client with the crate user agent and a whole-request deadline.
    pub fn new(timeout: Duration) -> DeliveryResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| DeliveryError::Network {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    /// Wrap a preconfigured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &ResourceRequest) -> DeliveryResult<Response> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(|e| DeliveryError::Network {
            message: format!("failed to read response body: {}", e),
        })?;

        debug!(url = %request.url, status, size = body.len(), "fetched");
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
