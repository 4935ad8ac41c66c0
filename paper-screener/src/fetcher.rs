use crate::types::{FetchConfig, Result, ScreenerError};
use crate::utils::links::host_of;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// HTTP fetcher for feed documents with retries, a size cap and a
/// per-host politeness delay.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Fetch the feed document at `url`. Fails after the configured retries.
    pub async fn fetch_feed(&self, url: &str) -> Result<String> {
        let start_time = Instant::now();
        debug!("Fetching feed: {}", url);

        let retry_delay = Duration::from_secs(self.config.retry_delay_seconds);
        let mut backoff = ExponentialBackoff {
            current_interval: retry_delay,
            initial_interval: retry_delay,
            max_interval: retry_delay * 32,
            multiplier: 2.0,
            // max_retries bounds the loop
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(url).await?;

            match self.fetch_once(url).await {
                Ok(content) => {
                    info!(
                        "Fetched feed: {} ({} bytes in {}ms)",
                        url,
                        content.len(),
                        start_time.elapsed().as_millis()
                    );
                    return Ok(content);
                }
                // Oversized feeds will not shrink on retry
                Err(e @ ScreenerError::FeedTooLarge { .. }) => return Err(e),
                Err(e) => {
                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!("Attempt {} failed for {}: {}, retrying in {:?}", attempt + 1, url, e, delay);
                            last_error = Some(e);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    last_error = Some(e);
                    break;
                }
            }
        }

        error!("Failed to fetch feed after {} attempts: {}", self.config.max_retries + 1, url);
        Err(last_error.unwrap_or_else(|| ScreenerError::General(format!("failed to fetch {}", url))))
    }

    async fn fetch_once(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(ScreenerError::General(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let max_bytes = self.config.max_feed_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > max_bytes {
                return Err(ScreenerError::FeedTooLarge {
                    size_mb: content_length as usize / (1024 * 1024),
                });
            }
        }

        let content = response.text().await?;
        // Chunked responses carry no length header
        if content.len() > max_bytes {
            return Err(ScreenerError::FeedTooLarge {
                size_mb: content.len() / (1024 * 1024),
            });
        }
        Ok(content)
    }

    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let host = host_of(url).ok_or_else(|| ScreenerError::General(format!("no host in {}", url)))?;
        let min_interval = Duration::from_millis(self.config.per_host_delay_ms);

        let mut rate_limiter = self.rate_limiter.lock().await;
        if let Some(last_request) = rate_limiter.get(&host) {
            let elapsed = last_request.elapsed();
            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                debug!("Rate limiting {}: waiting {:?}", host, wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }
        rate_limiter.insert(host, Instant::now());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> FetchConfig {
        FetchConfig {
            retry_delay_seconds: 0,
            per_host_delay_ms: 0,
            max_retries: 2,
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss></rss>"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(test_config()).unwrap();
        let content = fetcher.fetch_feed(&format!("{}/feed.xml", server.uri())).await.unwrap();
        assert_eq!(content, "<rss></rss>");
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(test_config()).unwrap();
        let result = fetcher.fetch_feed(&format!("{}/missing.xml", server.uri())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_oversized_feeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2 * 1024 * 1024)))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(FetchConfig {
            max_feed_size_mb: 1,
            ..test_config()
        })
        .unwrap();
        let result = fetcher.fetch_feed(&format!("{}/big.xml", server.uri())).await;
        assert!(matches!(result, Err(ScreenerError::FeedTooLarge { size_mb: 2 })));
    }
}
