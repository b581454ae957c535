//! Request/response types shared by the delivery components.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DeliveryError, DeliveryResult};

/// Resource class. Each class owns one durable partition family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Static,
    Image,
    Api,
    Font,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 4] = [Self::Static, Self::Image, Self::Api, Self::Font];

    /// Partition family name (`<family>-<version>`).
    pub fn family(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Image => "image",
            Self::Api => "api",
            Self::Font => "font",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.family())
    }
}

/// Read/write policy applied to a resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheFirst => write!(f, "cache-first"),
            Self::NetworkFirst => write!(f, "network-first"),
            Self::StaleWhileRevalidate => write!(f, "stale-while-revalidate"),
        }
    }
}

/// Coarse priority tier shared by cache eviction and queue admission.
///
/// Ordering is significant: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// How the host issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    /// Top-level page navigation.
    Navigate,
    /// Script, style, image, font or data load from a page.
    #[default]
    Subresource,
    /// Speculative load of a resource the page may need later.
    Prefetch,
}

/// A resource request as seen by the interception layer.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub url: Url,
    pub method: reqwest::Method,
    pub mode: RequestMode,
}

impl ResourceRequest {
    /// Build a `GET` subresource request.
    pub fn get(url: &str) -> DeliveryResult<Self> {
        let url = Url::parse(url).map_err(|e| DeliveryError::Config {
            message: format!("invalid request url {url}: {e}"),
        })?;
        Ok(Self {
            url,
            method: reqwest::Method::GET,
            mode: RequestMode::Subresource,
        })
    }

    pub fn with_method(mut self, method: reqwest::Method) -> Self {
        self.method = method;
        self
    }

    pub fn navigate(mut self) -> Self {
        self.mode = RequestMode::Navigate;
        self
    }

    pub fn prefetch(mut self) -> Self {
        self.mode = RequestMode::Prefetch;
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Normalized resource identity: the URL without its fragment.
    pub fn key(&self) -> String {
        normalize_key(&self.url)
    }
}

/// Strip the fragment; everything else (query included) is identity.
pub fn normalize_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// A response body plus the headers the cache layer cares about.
///
/// The body is a reference-counted buffer: cloning a response shares the
/// bytes, so the cache write and the caller can both consume it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,

    /// Header names are stored lowercased.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    pub body: Bytes,
}

/// Marker body for non-navigation offline responses.
pub const OFFLINE_MARKER: &str = "offline";

const OFFLINE_PAGE: &str = "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>You are offline</h1><p>This page is not available right now. \
Check your connection and try again.</p></body></html>\n";

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 2xx responses are written back unless they opt out with `no-store`.
    pub fn is_cacheable(&self) -> bool {
        self.is_success()
            && !self
                .header("cache-control")
                .is_some_and(|cc| cc.split(',').any(|d| d.trim() == "no-store"))
    }

    /// Synthetic 503 used when neither network nor cache can answer.
    pub fn offline(navigation: bool) -> Self {
        if navigation {
            Self::new(503, OFFLINE_PAGE)
                .with_header("content-type", "text/html; charset=utf-8")
                .with_header("cache-control", "no-store")
        } else {
            Self::new(503, OFFLINE_MARKER)
                .with_header("content-type", "text/plain")
                .with_header("cache-control", "no-store")
        }
    }

    pub fn is_offline_fallback(&self) -> bool {
        self.status == 503 && self.header("cache-control") == Some("no-store")
    }
}
