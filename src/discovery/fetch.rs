//! Page fetching over Tor

use crate::tor::{CircuitControl, TorManager};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// Bodies larger than this are rejected
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// A fetched page
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Final URL after redirects
    pub url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub elapsed: Duration,
}

impl Page {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map_or(true, |ct| ct.contains("html") || ct.contains("text/plain"))
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no circuit available: {0}")]
    NoCircuit(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl FetchError {
    /// Worth retrying later, possibly on another circuit
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::NoCircuit(_) | FetchError::Timeout | FetchError::Transport(_) => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
            FetchError::TooLarge { .. } => false,
        }
    }
}

/// Something that can GET a URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Page, FetchError>;
}

/// Fetches through the circuit pool, one isolated session per circuit
pub struct TorFetcher<C: CircuitControl> {
    manager: Arc<Mutex<TorManager<C>>>,
    max_body: usize,
}

impl<C: CircuitControl> TorFetcher<C> {
    pub fn new(manager: Arc<Mutex<TorManager<C>>>) -> Self {
        Self {
            manager,
            max_body: MAX_BODY_BYTES,
        }
    }
}

#[async_trait]
impl<C: CircuitControl + 'static> Fetcher for TorFetcher<C> {
    async fn fetch(&self, url: &Url) -> Result<Page, FetchError> {
        let (circuit, client) = {
            let mut manager = self.manager.lock().await;
            manager
                .session()
                .await
                .map_err(|e| FetchError::NoCircuit(format!("{:#}", e)))?
        };

        let started = Instant::now();
        let result = get(&client, url, self.max_body).await;
        match &result {
            Err(FetchError::Timeout) | Err(FetchError::Transport(_)) => {
                debug!("Request to {} failed on circuit {}, retiring it", url, circuit.id);
                self.manager.lock().await.mark_circuit_dead(&circuit.id);
            },
            _ => {},
        }
        result.map(|mut page| {
            page.elapsed = started.elapsed();
            page
        })
    }
}

async fn get(client: &reqwest::Client, url: &Url, max_body: usize) -> Result<Page, FetchError> {
    let mut response = client
        .get(url.clone())
        .send()
        .await
        .map_err(transport_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    if response
        .content_length()
        .is_some_and(|len| len > max_body as u64)
    {
        return Err(FetchError::TooLarge { limit: max_body });
    }

    let final_url = response.url().clone();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase());

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
        if body.len() + chunk.len() > max_body {
            return Err(FetchError::TooLarge { limit: max_body });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(Page {
        url: final_url,
        status: status.as_u16(),
        content_type,
        body: String::from_utf8_lossy(&body).into_owned(),
        elapsed: Duration::ZERO,
    })
}

fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(e.to_string())
    }
}
