use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::parser::{first_table, RawTable};
use crate::settings::Settings;

/// Anything that can turn a page locator into its first table.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_table(&self, url: &str) -> Result<RawTable, FetchError>;
}

/// Live pages over HTTP.
pub struct HttpSource {
    client: reqwest::Client,
    max_retries: u32,
    base_backoff_ms: u64,
    timeout_secs: u64,
}

impl HttpSource {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(settings.user_agent.as_str())
            .build()?;
        Ok(HttpSource {
            client,
            max_retries: settings.max_retries,
            base_backoff_ms: settings.base_backoff_ms,
            timeout_secs: settings.request_timeout_secs,
        })
    }

    async fn get_html(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| self.classify(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(|e| self.classify(url, e))
    }

    fn classify(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            FetchError::Request {
                url: url.to_string(),
                source: e,
            }
        }
    }

    async fn get_with_retry(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.get_html(url).await {
                Ok(html) => return Ok(html),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = backoff(self.base_backoff_ms, attempt);
                    warn!(
                        "{} (attempt {}/{}), backing off {:.1}s",
                        e,
                        attempt + 1,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// `base_ms * 2^attempt`, saturating instead of overflowing.
pub fn backoff(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt)))
}

#[async_trait]
impl PageSource for HttpSource {
    async fn fetch_table(&self, url: &str) -> Result<RawTable, FetchError> {
        let start = Instant::now();
        let html = self.get_with_retry(url).await?;
        debug!(url, bytes = html.len(), latency_ms = start.elapsed().as_millis() as u64, "fetched");
        first_table(&html).ok_or_else(|| FetchError::NoTableFound { url: url.to_string() })
    }
}
