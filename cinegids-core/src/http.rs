//! Rate-limited HTTP client shared by every backend.
//!
//! One pooled [`reqwest::Client`] serves all hosts; outbound pacing is a
//! token bucket per host. The bucket lock covers only the token arithmetic,
//! never a network call or a sleep, so one slow host cannot stall another.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use cinegids_config::{RateLimit, Settings};

use crate::error::{LookupError, Result};

const RETRYABLE_STATUS: &[u16] = &[429, 500, 502, 503, 504];

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: RateLimit) -> Self {
        Self {
            tokens: limit.burst,
            capacity: limit.burst,
            refill_per_sec: limit.per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec)
            .min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    fn try_take(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// Pooled HTTP client with per-host token-bucket pacing and bounded retries
/// on transient status codes.
#[derive(Debug)]
pub struct RateLimitedClient {
    client: reqwest::Client,
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    limits: Vec<(String, RateLimit)>,
    acquire_timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
}

impl RateLimitedClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("nl-NL,nl;q=0.9,en;q=0.8"),
        );
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .build()?;

        // Host suffix match, so api subdomains share their parent's budget.
        let limits = vec![
            ("poms.omroep.nl".to_string(), settings.poms_rate),
            ("themoviedb.org".to_string(), settings.tmdb_rate),
            ("duckduckgo.com".to_string(), settings.search_rate),
            ("startpage.com".to_string(), settings.search_rate),
            ("vprogids.nl".to_string(), settings.vpro_rate),
            ("cinema.nl".to_string(), settings.vpro_rate),
        ];

        Ok(Self {
            client,
            buckets: DashMap::new(),
            limits,
            acquire_timeout: settings.acquire_timeout,
            max_retries: settings.max_retries,
            backoff_base: settings.retry_backoff_base,
        })
    }

    /// Rate-limited GET with transient-status retries.
    pub async fn get(&self, url: &Url) -> Result<reqwest::Response> {
        self.execute(url, || self.client.get(url.clone())).await
    }

    /// Rate-limited GET with extra headers (used by signed API requests).
    pub async fn get_with_headers(
        &self,
        url: &Url,
        headers: HeaderMap,
    ) -> Result<reqwest::Response> {
        self.execute(url, || self.client.get(url.clone()).headers(headers.clone()))
            .await
    }

    /// Rate-limited JSON POST. Only used for idempotent search requests, so
    /// it shares the GET retry policy.
    pub async fn post_json(
        &self,
        url: &Url,
        headers: HeaderMap,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        self.execute(url, || {
            self.client
                .post(url.clone())
                .headers(headers.clone())
                .json(body)
        })
        .await
    }

    async fn execute<F>(&self, url: &Url, make: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let host = url.host_str().unwrap_or_default().to_string();
        // One token per logical call. Retries ride on the same token;
        // the exponential backoff below already spaces them out.
        self.acquire(&host).await?;
        let mut attempt: u32 = 0;
        loop {
            let response = make().send().await?;
            let status = response.status().as_u16();
            if RETRYABLE_STATUS.contains(&status) && attempt < self.max_retries
            {
                let delay = self.backoff_base * 2u32.pow(attempt);
                tracing::warn!(
                    host,
                    status,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient status, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            return Ok(response);
        }
    }

    fn limit_for(&self, host: &str) -> Option<RateLimit> {
        self.limits
            .iter()
            .find(|(suffix, _)| {
                host == suffix || host.ends_with(&format!(".{suffix}"))
            })
            .map(|(_, limit)| *limit)
    }

    /// Block until the host's bucket yields a token, bounded by the acquire
    /// timeout. Hosts without a configured limit pass straight through.
    async fn acquire(&self, host: &str) -> Result<()> {
        let Some(limit) = self.limit_for(host) else {
            return Ok(());
        };
        let bucket = self
            .buckets
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(limit))))
            .clone();

        let deadline = Instant::now() + self.acquire_timeout;
        loop {
            let wait = {
                let mut guard = bucket.lock().await;
                match guard.try_take(Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };
            let now = Instant::now();
            if now >= deadline {
                return Err(LookupError::RateLimitTimeout {
                    host: host.to_string(),
                });
            }
            tokio::time::sleep(wait.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        Settings::default()
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_pacing() {
        let mut settings = test_settings();
        settings.vpro_rate = RateLimit {
            per_second: 1.0,
            burst: 2.0,
        };
        let client = RateLimitedClient::new(&settings).unwrap();

        let start = Instant::now();
        client.acquire("www.vprogids.nl").await.unwrap();
        client.acquire("www.vprogids.nl").await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));

        // Third token has to be refilled at 1/s.
        client.acquire("www.vprogids.nl").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_times_out_instead_of_waiting_forever() {
        let mut settings = test_settings();
        settings.acquire_timeout = Duration::from_secs(5);
        settings.search_rate = RateLimit {
            per_second: 0.001,
            burst: 1.0,
        };
        let client = RateLimitedClient::new(&settings).unwrap();

        client.acquire("html.duckduckgo.com").await.unwrap();
        let err = client.acquire("html.duckduckgo.com").await.unwrap_err();
        assert!(matches!(err, LookupError::RateLimitTimeout { .. }));
    }

    #[tokio::test]
    async fn unconfigured_hosts_are_unthrottled() {
        let client = RateLimitedClient::new(&test_settings()).unwrap();
        for _ in 0..50 {
            client.acquire("example.org").await.unwrap();
        }
    }

    #[tokio::test]
    async fn hosts_get_independent_buckets() {
        let mut settings = test_settings();
        settings.search_rate = RateLimit {
            per_second: 0.001,
            burst: 1.0,
        };
        let client = RateLimitedClient::new(&settings).unwrap();
        client.acquire("html.duckduckgo.com").await.unwrap();
        // duckduckgo is exhausted; startpage still has its burst.
        client.acquire("www.startpage.com").await.unwrap();
    }

    #[tokio::test]
    async fn retried_call_consumes_a_single_token() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let statuses =
                ["503 Service Unavailable", "503 Service Unavailable", "200 OK"];
            for status in statuses {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = sock.write_all(reply.as_bytes()).await;
            }
        });

        let mut settings = test_settings();
        settings.retry_backoff_base = Duration::from_millis(5);
        let mut client = RateLimitedClient::new(&settings).unwrap();
        client.limits.push((
            "127.0.0.1".to_string(),
            RateLimit {
                per_second: 0.001,
                burst: 5.0,
            },
        ));

        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        let response = client.get(&url).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);

        // Three attempts went over the wire, but only one token left
        // the bucket.
        let bucket = client.buckets.get("127.0.0.1").unwrap().clone();
        let tokens = bucket.lock().await.tokens;
        assert!(tokens > 3.5, "expected one token consumed, bucket at {tokens}");
    }

    #[test]
    fn suffix_matching_covers_subdomains() {
        let client = RateLimitedClient::new(&test_settings()).unwrap();
        assert!(client.limit_for("rs.poms.omroep.nl").is_some());
        assert!(client.limit_for("www.vprogids.nl").is_some());
        assert!(client.limit_for("notvprogids.nl").is_none());
        assert!(client.limit_for("example.org").is_none());
    }
}
