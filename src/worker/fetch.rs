use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{NoteminderError, Result};

pub const OFFLINE_STATUS: u16 = 503;
pub const OFFLINE_BODY: &str = "Offline - content unavailable";

/// A request as seen by the worker. `url` is the path plus query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Only GET responses are cacheable; they are keyed by URL.
    pub fn cache_key(&self) -> Option<&str> {
        self.method
            .eq_ignore_ascii_case("GET")
            .then_some(self.url.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    /// What the worker answers when neither network nor cache can serve a request.
    pub fn offline() -> Self {
        Self::new(OFFLINE_STATUS, "text/plain", OFFLINE_BODY)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_offline(&self) -> bool {
        self.status == OFFLINE_STATUS && self.body == OFFLINE_BODY.as_bytes()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The network, as far as the worker is concerned.
///
/// `Err` means the request never produced a response (offline, DNS, refused).
/// HTTP error statuses are still `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// Fetches from an upstream origin over HTTP.
pub struct HttpFetcher {
    client: reqwest::Client,
    origin: String,
}

impl HttpFetcher {
    pub fn new(origin: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            origin: origin.trim_end_matches('/').to_string(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let url = format!("{}{}", self.origin, request.url);
        let fail = |message: String| NoteminderError::Fetch {
            url: url.clone(),
            message,
        };

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| fail(e.to_string()))?;
        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| fail(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.bytes().await.map_err(|e| fail(e.to_string()))?;

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}
