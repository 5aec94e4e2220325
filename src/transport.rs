//! Fetch-by-URL transports
//!
//! The pipeline only needs "give me the bytes behind this URL" as a stream of
//! chunks. `HttpTransport` does that over reqwest; `MemoryTransport` serves
//! fixed bodies for offline mirrors and tests.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::Client;

use crate::config;
use crate::error::{Error, Result};
use crate::{log_debug, log_error};

const MODULE: &str = "transport";

/// Chunk size `MemoryTransport` splits bodies into
const MEMORY_CHUNK_SIZE: usize = 64 * 1024;

/// An in-flight response body
pub struct FetchResponse {
    /// Size announced by the server, if any
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl FetchResponse {
    /// Drain the whole body into memory.
    ///
    /// The announced length is only a capacity hint, capped at
    /// `config::download::MAX_PREALLOC_BYTES`.
    pub async fn collect(mut self) -> Result<Vec<u8>> {
        let hint = self
            .content_length
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0)
            .min(config::download::MAX_PREALLOC_BYTES);
        let mut data = Vec::with_capacity(hint);
        while let Some(chunk) = self.body.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }
}

/// Something that can fetch bytes given a URL
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse>;
}

/// HTTP(S) transport backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(config::app::USER_AGENT)
            .connect_timeout(Duration::from_secs(config::download::CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::download_failed(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        log_debug!(MODULE, "GET {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            log_error!(MODULE, "Failed to fetch {}: {}", url, e);
            Error::download_failed(format!("Failed to fetch {}: {}", url, e))
        })?;

        if !response.status().is_success() {
            log_error!(MODULE, "Fetch of {} failed with status: {}", url, response.status());
            return Err(Error::download_failed(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }

        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::download_failed(format!("Download error: {}", e))))
            .boxed();

        Ok(FetchResponse {
            content_length,
            body,
        })
    }
}

#[derive(Debug, Clone)]
enum Resource {
    Body(Bytes),
    /// Serves the bytes, then fails the stream
    Broken(Bytes),
}

/// Serves fixed bodies keyed by URL
#[derive(Debug, Default)]
pub struct MemoryTransport {
    resources: RwLock<HashMap<String, Resource>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.store(url.into(), Resource::Body(body.into()));
    }

    /// Register a body whose transfer breaks after `body` has been sent
    pub fn insert_broken(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.store(url.into(), Resource::Broken(body.into()));
    }

    fn store(&self, url: String, resource: Resource) {
        if let Ok(mut resources) = self.resources.write() {
            resources.insert(url, resource);
        }
    }

    fn lookup(&self, url: &str) -> Option<Resource> {
        self.resources.read().ok()?.get(url).cloned()
    }
}

fn chunked(body: &Bytes) -> Vec<Result<Bytes>> {
    (0..body.len())
        .step_by(MEMORY_CHUNK_SIZE)
        .map(|start| Ok(body.slice(start..(start + MEMORY_CHUNK_SIZE).min(body.len()))))
        .collect()
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        match self.lookup(url) {
            Some(Resource::Body(body)) => Ok(FetchResponse {
                content_length: Some(body.len() as u64),
                body: stream::iter(chunked(&body)).boxed(),
            }),
            Some(Resource::Broken(body)) => {
                let mut chunks = chunked(&body);
                chunks.push(Err(Error::download_failed("connection reset")));
                Ok(FetchResponse {
                    content_length: Some(body.len() as u64 * 2),
                    body: stream::iter(chunks).boxed(),
                })
            }
            None => Err(Error::download_failed(format!("{} returned status 404 Not Found", url))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_memory_transport_serves_chunked_body() {
        let transport = MemoryTransport::new();
        let body = vec![7u8; MEMORY_CHUNK_SIZE * 2 + 10];
        transport.insert("mem://fw", body.clone());

        let response = transport.fetch("mem://fw").await.unwrap();
        assert_eq!(response.content_length, Some(body.len() as u64));
        assert_eq!(response.collect().await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_collect_ignores_absurd_content_length() {
        for content_length in [Some(u64::MAX), Some(100 * 1024 * 1024 * 1024), None] {
            let response = FetchResponse {
                content_length,
                body: stream::iter([Ok(Bytes::from_static(b"{}"))]).boxed(),
            };
            assert_eq!(response.collect().await.unwrap(), b"{}");
        }
    }

    #[tokio::test]
    async fn test_memory_transport_missing_url() {
        let transport = MemoryTransport::new();
        let err = transport.fetch("mem://missing").await.err().unwrap();
        assert!(matches!(err, Error::DownloadFailed(_)));
    }

    #[tokio::test]
    async fn test_memory_transport_broken_body_fails_collect() {
        let transport = MemoryTransport::new();
        transport.insert_broken("mem://broken", vec![1u8; 100]);
        let response = transport.fetch("mem://broken").await.unwrap();
        assert!(response.collect().await.is_err());
    }

    #[tokio::test]
    async fn test_http_transport_fetches_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Sub/stable/navigator/ardusub"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x7fELF-body".to_vec()))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = format!("{}/Sub/stable/navigator/ardusub", server.uri());
        let body = transport.fetch(&url).await.unwrap().collect().await.unwrap();
        assert_eq!(body, b"\x7fELF-body");
    }

    #[tokio::test]
    async fn test_http_transport_reports_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .fetch(&format!("{}/missing.apj", server.uri()))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("404"));
    }
}
