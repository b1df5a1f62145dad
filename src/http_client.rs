use crate::config::{HttpConfig, DEFAULT_USER_AGENT};
use crate::error::SourceError;
use crate::models::HttpClientKind;
use crate::session::Session;
use rand::Rng;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder, Response, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// User agents to rotate through for sources that are not impersonating a browser session
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// Body fragments of anti-automation interstitials
const CHALLENGE_MARKERS: &[&str] = &["cf-chl", "challenge-platform", "Just a moment...", "ddos-guard"];

#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub probe_timeout: Duration,
    pub max_retries: usize,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub enable_gzip: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            max_retries: 4,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 8000,
            enable_gzip: true,
        }
    }
}

impl From<&HttpConfig> for HttpClientConfig {
    fn from(cfg: &HttpConfig) -> Self {
        Self {
            timeout: cfg.timeout(),
            probe_timeout: cfg.probe_timeout(),
            max_retries: cfg.max_retries,
            initial_retry_delay_ms: cfg.initial_retry_delay_ms,
            max_retry_delay_ms: cfg.max_retry_delay_ms,
            enable_gzip: cfg.enable_compression,
        }
    }
}

/// HTTP client handed to sources, seeded with the source's session cookies
pub struct SourceClient {
    client: Client,
    config: HttpClientConfig,
    kind: HttpClientKind,
    user_agent: String,
}

impl SourceClient {
    /// Build a client of the given kind. Impersonating clients reuse the
    /// user agent stored in the session, since clearance cookies are bound to it.
    pub fn new(
        kind: HttpClientKind,
        session: Option<&Session>,
        config: HttpClientConfig,
    ) -> Result<Self, reqwest::Error> {
        let user_agent = match kind {
            HttpClientKind::Impersonating => session
                .and_then(|s| s.user_agent.clone())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            HttpClientKind::Default => Self::random_user_agent().to_string(),
        };

        let jar = Arc::new(Jar::default());
        if let Some(session) = session {
            seed_jar(&jar, session);
        }

        let builder = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(user_agent.clone())
            .cookie_provider(jar)
            .gzip(config.enable_gzip)
            .brotli(config.enable_gzip)
            .default_headers(Self::default_headers(kind))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        Ok(Self {
            client: builder.build()?,
            config,
            kind,
            user_agent,
        })
    }

    fn default_headers(kind: HttpClientKind) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
        match kind {
            HttpClientKind::Default => {
                headers.insert("Accept", HeaderValue::from_static("*/*"));
            }
            HttpClientKind::Impersonating => {
                // Headers that mimic a real browser navigation
                headers.insert("Accept", HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8"));
                headers.insert("DNT", HeaderValue::from_static("1"));
                headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
                headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
                headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
                headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
                headers.insert("Sec-Fetch-User", HeaderValue::from_static("?1"));
            }
        }
        headers
    }

    /// Get a random user agent from the pool
    fn random_user_agent() -> &'static str {
        let mut rng = rand::thread_rng();
        let index = rng.gen_range(0..USER_AGENTS.len());
        USER_AGENTS[index]
    }

    pub fn kind(&self) -> HttpClientKind {
        self.kind
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Calculate retry delay with exponential backoff and jitter
    fn calculate_retry_delay(&self, attempt: usize) -> Duration {
        let base_delay = self.config.initial_retry_delay_ms;
        let max_delay = self.config.max_retry_delay_ms;

        // Exponential backoff: base_delay * 2^attempt
        let delay_ms = (base_delay * 2u64.pow(attempt as u32)).min(max_delay);

        // Add jitter (±25% randomness) to avoid thundering herd
        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(0.75..=1.25);
        let final_delay_ms = (delay_ms as f64 * jitter) as u64;

        Duration::from_millis(final_delay_ms)
    }

    /// Check if a status code is retryable
    fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status.as_u16(),
            // Rate limiting
            429 |
            // Server errors
            500 | 502 | 504 |
            // Cloudflare origin errors
            520 | 521 | 522 | 523 | 524
        )
    }

    /// Fetch a URL with retry logic
    pub async fn get_with_retry(&self, url: &str) -> Result<Response, reqwest::Error> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if Self::is_retryable_status(status) && attempt < self.config.max_retries {
                        log::warn!(
                            "Received retryable status {} for {}, attempt {}/{}",
                            status,
                            url,
                            attempt + 1,
                            self.config.max_retries + 1
                        );
                        sleep(self.calculate_retry_delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    // Return the response (even if it's an error status that's not retryable)
                    return Ok(response);
                }
                Err(e) => {
                    let should_retry = e.is_timeout() || e.is_connect() || e.is_request();
                    if should_retry && attempt < self.config.max_retries {
                        log::warn!(
                            "Request failed for {}, attempt {}/{}: {}",
                            url,
                            attempt + 1,
                            self.config.max_retries + 1,
                            e
                        );
                        sleep(self.calculate_retry_delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn checked(&self, url: &str) -> Result<Response, SourceError> {
        let response = self.get_with_retry(url).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(SourceError::NotFound);
        }
        if status == StatusCode::FORBIDDEN || status == StatusCode::SERVICE_UNAVAILABLE {
            let mitigated = response
                .headers()
                .get("cf-mitigated")
                .map(|v| v.as_bytes() == b"challenge")
                .unwrap_or(false);
            let body = response.text().await.unwrap_or_default();
            if mitigated || looks_like_challenge(&body) {
                return Err(SourceError::ChallengeRequired);
            }
        }
        Err(SourceError::Transient(format!("HTTP {} for {}", status, url)))
    }

    /// Fetch a page and return its body, mapping statuses onto [`SourceError`]
    pub async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        let response = self.checked(url).await?;
        Ok(response.text().await?)
    }

    /// Fetch binary content, returning the bytes and the declared content type
    pub async fn get_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>), SourceError> {
        let response = self.checked(url).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string());
        let bytes = response.bytes().await?;
        Ok((bytes.to_vec(), content_type))
    }

    /// Submit a form once (no retry) and return the response body
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String, SourceError> {
        let response = self.client.post(url).form(form).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.text().await?);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound);
        }
        Err(SourceError::Transient(format!("HTTP {} for {}", status, url)))
    }

    /// Single lightweight request telling whether the session is still accepted
    pub async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).timeout(self.config.probe_timeout).send().await {
            Ok(response) => {
                let status = response.status();
                log::debug!("Probe {} -> {}", url, status);
                !status.is_client_error() && !status.is_server_error()
            }
            Err(e) => {
                log::debug!("Probe {} failed: {}", url, e);
                false
            }
        }
    }
}

fn looks_like_challenge(body: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|m| body.contains(m))
}

/// Load session cookies into a reqwest jar. Chrome reports domain cookies with
/// a leading dot; the others are host-only and get no `Domain` attribute.
fn seed_jar(jar: &Jar, session: &Session) {
    for c in session.live_cookies() {
        let host = c.domain.trim_start_matches('.');
        let scheme = if c.secure { "https" } else { "http" };
        let url = match Url::parse(&format!("{}://{}{}", scheme, host, c.path)) {
            Ok(url) => url,
            Err(e) => {
                log::debug!("Skipping cookie {} for {}: {}", c.name, c.domain, e);
                continue;
            }
        };
        let mut cookie = format!("{}={}; Path={}", c.name, c.value, c.path);
        if c.domain.starts_with('.') {
            cookie.push_str(&format!("; Domain={}", host));
        }
        if c.secure {
            cookie.push_str("; Secure");
        }
        jar.add_cookie_str(&cookie, &url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StoredCookie;
    use reqwest::cookie::CookieStore;

    #[tokio::test]
    async fn test_client_creation() {
        let client = SourceClient::new(HttpClientKind::Default, None, HttpClientConfig::default());
        assert!(client.is_ok());
        assert!(USER_AGENTS.contains(&client.unwrap().user_agent()));
    }

    #[tokio::test]
    async fn test_impersonating_client_reuses_session_user_agent() {
        let mut session = Session::new("s", HttpClientKind::Impersonating);
        session.user_agent = Some("SolverBrowser/1.0".into());
        let client =
            SourceClient::new(HttpClientKind::Impersonating, Some(&session), HttpClientConfig::default())
                .unwrap();
        assert_eq!(client.user_agent(), "SolverBrowser/1.0");
    }

    #[test]
    fn test_seed_jar_domain_and_host_cookies() {
        let mut session = Session::new("s", HttpClientKind::Impersonating);
        session.cookies = vec![
            StoredCookie {
                name: "cf_clearance".into(),
                value: "abc".into(),
                domain: ".example.com".into(),
                path: "/".into(),
                expires: None,
                secure: true,
                http_only: true,
            },
            StoredCookie {
                name: "host_only".into(),
                value: "1".into(),
                domain: "www.example.com".into(),
                path: "/".into(),
                expires: None,
                secure: false,
                http_only: false,
            },
        ];
        let jar = Jar::default();
        seed_jar(&jar, &session);

        let url = Url::parse("https://www.example.com/manga").unwrap();
        let header = jar.cookies(&url).unwrap();
        let header = header.to_str().unwrap();
        assert!(header.contains("cf_clearance=abc"));
        assert!(header.contains("host_only=1"));

        let other = Url::parse("https://cdn.example.com/").unwrap();
        let header = jar.cookies(&other).unwrap();
        assert_eq!(header.to_str().unwrap(), "cf_clearance=abc");
    }

    #[test]
    fn test_retryable_status() {
        assert!(SourceClient::is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(SourceClient::is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!SourceClient::is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!SourceClient::is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!SourceClient::is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_challenge_markers() {
        assert!(looks_like_challenge("<title>Just a moment...</title>"));
        assert!(!looks_like_challenge("<html><body>Chapter 1</body></html>"));
    }

    #[tokio::test]
    async fn test_retry_delay_calculation() {
        let client = SourceClient::new(HttpClientKind::Default, None, HttpClientConfig::default()).unwrap();
        let delay0 = client.calculate_retry_delay(0);
        let delay3 = client.calculate_retry_delay(3);
        assert!(delay0.as_millis() >= 375 && delay0.as_millis() <= 625);
        assert!(delay3 > delay0);
    }
}
