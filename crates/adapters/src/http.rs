// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound HTTP used by the chart values fetcher and webhook triggers.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("failed to create HTTP client: {0}")]
    Build(String),

    #[error("request to {url:?} failed: {message}")]
    Request { url: String, message: String },

    #[error("response from {url:?} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GET `url`, failing if the body is larger than `limit` bytes.
    async fn get(&self, url: &str, limit: usize) -> Result<HttpResponse, HttpError>;

    /// POST an empty body to `url`, reading at most `drain_limit` bytes of the
    /// response body. The returned body is truncated to that limit.
    async fn post_empty(&self, url: &str, drain_limit: usize) -> Result<HttpResponse, HttpError>;
}

/// reqwest-backed client.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;
        Ok(Self { client })
    }
}

async fn read_limited(
    url: &str,
    mut resp: reqwest::Response,
    limit: usize,
    truncate: bool,
) -> Result<HttpResponse, HttpError> {
    let status = resp.status().as_u16();
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut body = Vec::new();
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| HttpError::Request { url: url.to_string(), message: e.to_string() })?
    {
        if body.len() + chunk.len() > limit {
            if truncate {
                body.extend_from_slice(&chunk[..limit - body.len()]);
                break;
            }
            return Err(HttpError::TooLarge { url: url.to_string(), limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(HttpResponse { status, content_type, body })
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, limit: usize) -> Result<HttpResponse, HttpError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HttpError::Request { url: url.to_string(), message: e.to_string() })?;
        read_limited(url, resp, limit, false).await
    }

    async fn post_empty(&self, url: &str, drain_limit: usize) -> Result<HttpResponse, HttpError> {
        let resp = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| HttpError::Request { url: url.to_string(), message: e.to_string() })?;
        read_limited(url, resp, drain_limit, true).await
    }
}

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(coverage_nightly, coverage(off))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::watch;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct HttpCall {
        pub method: &'static str,
        pub url: String,
    }

    #[derive(Default)]
    struct FakeHttpState {
        responses: HashMap<String, Result<HttpResponse, HttpError>>,
        calls: Vec<HttpCall>,
    }

    /// Responds per URL; unknown URLs get 404.
    #[derive(Clone)]
    pub struct FakeHttpClient {
        inner: Arc<Mutex<FakeHttpState>>,
        count: Arc<watch::Sender<usize>>,
    }

    impl Default for FakeHttpClient {
        fn default() -> Self {
            let (count, _) = watch::channel(0);
            Self { inner: Arc::default(), count: Arc::new(count) }
        }
    }

    impl FakeHttpClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, url: &str, response: Result<HttpResponse, HttpError>) {
            self.inner.lock().responses.insert(url.to_string(), response);
        }

        pub fn respond_ok(&self, url: &str, content_type: &str, body: &str) {
            self.respond(
                url,
                Ok(HttpResponse {
                    status: 200,
                    content_type: Some(content_type.to_string()),
                    body: body.as_bytes().to_vec(),
                }),
            );
        }

        pub fn calls(&self) -> Vec<HttpCall> {
            self.inner.lock().calls.clone()
        }

        pub async fn wait_for_calls(&self, n: usize) {
            let mut rx = self.count.subscribe();
            let _ = rx.wait_for(|c| *c >= n).await;
        }

        fn call(&self, method: &'static str, url: &str) -> Result<HttpResponse, HttpError> {
            let response = {
                let mut inner = self.inner.lock();
                inner.calls.push(HttpCall { method, url: url.to_string() });
                inner
                    .responses
                    .get(url)
                    .cloned()
                    .unwrap_or(Ok(HttpResponse { status: 404, content_type: None, body: Vec::new() }))
            };
            self.count.send_modify(|c| *c += 1);
            response
        }
    }

    #[async_trait]
    impl HttpClient for FakeHttpClient {
        async fn get(&self, url: &str, limit: usize) -> Result<HttpResponse, HttpError> {
            let resp = self.call("GET", url)?;
            if resp.body.len() > limit {
                return Err(HttpError::TooLarge { url: url.to_string(), limit });
            }
            Ok(resp)
        }

        async fn post_empty(&self, url: &str, drain_limit: usize) -> Result<HttpResponse, HttpError> {
            let mut resp = self.call("POST", url)?;
            resp.body.truncate(drain_limit);
            Ok(resp)
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeHttpClient, HttpCall};
