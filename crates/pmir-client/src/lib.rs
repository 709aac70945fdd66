//! Authenticated portal session: host-keyed cookie jar, form login with a
//! retry policy, and fingerprinted page fetches.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use reqwest::cookie::CookieStore;
use reqwest::header::{self, HeaderValue};
use reqwest::{StatusCode, Url};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "pmir-client";

/// Fixed user-agent presented on every portal request, login included. The
/// portal rejects requests without a browser-looking agent.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// In-memory cookie jar keyed by host. Both entity pipelines talk to the
/// same portal host concurrently, so the map is behind a mutex; a set for
/// one host replaces that host's cookie list wholesale.
#[derive(Debug, Default)]
pub struct HostCookieJar {
    store: Mutex<HashMap<String, Vec<String>>>,
}

impl CookieStore for HostCookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let cookies: Vec<String> = cookie_headers
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .map(|pair| pair.trim().to_string())
            .filter(|pair| !pair.is_empty())
            .collect();
        if cookies.is_empty() {
            return;
        }
        let Some(host) = url.host_str() else {
            return;
        };
        let mut store = self.store.lock().expect("cookie jar mutex poisoned");
        debug!(host, count = cookies.len(), "storing session cookies");
        store.insert(host.to_string(), cookies);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let store = self.store.lock().expect("cookie jar mutex poisoned");
        let cookies = store.get(url.host_str()?)?;
        if cookies.is_empty() {
            return None;
        }
        HeaderValue::from_str(&cookies.join("; ")).ok()
    }
}

/// Login retry policy: fixed number of attempts with a fixed inter-attempt
/// delay. Injectable so tests can drive the retry loop without sleeping.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn without_delay(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, _attempt: usize) -> Duration {
        self.delay
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("login rejected with http status {0}")]
    Status(u16),
    #[error("login failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: Box<AuthError>,
    },
}

impl AuthError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, AuthError::Exhausted { .. })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    /// True when the portal has dropped or rejected the session, which the
    /// engine answers with a re-login rather than a plain cycle retry.
    pub fn is_session_rejected(&self) -> bool {
        matches!(
            self,
            FetchError::HttpStatus {
                status: 401 | 403,
                ..
            }
        )
    }
}

/// One fetched portal page with the digest the change detector gates on.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: String,
    pub login_url: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl PortalConfig {
    pub fn new(base_url: impl Into<String>, login_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            login_url: login_url.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Run `login` up to `policy.max_attempts` times, sleeping the policy delay
/// between attempts. After exhaustion the last underlying cause is wrapped
/// in a single `AuthError::Exhausted`.
pub async fn login_with_retry<F, Fut>(policy: &RetryPolicy, mut login: F) -> Result<(), AuthError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), AuthError>>,
{
    let mut last: Option<AuthError> = None;

    for attempt in 1..=policy.max_attempts.max(1) {
        match login().await {
            Ok(()) => {
                info!(attempt, "logged in to portal");
                return Ok(());
            }
            Err(err) => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "login attempt failed"
                );
                last = Some(err);
            }
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
        }
    }

    Err(AuthError::Exhausted {
        attempts: policy.max_attempts.max(1),
        last: Box::new(last.expect("at least one attempt ran")),
    })
}

/// HTTP client bound to one portal deployment. Holds the shared cookie jar;
/// cloning is cheap and keeps the same session.
#[derive(Debug, Clone)]
pub struct PortalClient {
    http: reqwest::Client,
    config: PortalConfig,
}

impl PortalClient {
    pub fn new(config: PortalConfig) -> anyhow::Result<Self> {
        let jar = Arc::new(HostCookieJar::default());
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .cookie_provider(jar)
            .timeout(config.timeout)
            .build()
            .context("building portal http client")?;
        Ok(Self { http, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Form-encoded login POST. Success is exactly HTTP 200 with a readable
    /// body; the session cookie lands in the jar as a side effect.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let form = [
            ("action", "login"),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];
        let response = self
            .http
            .post(&self.config.login_url)
            .header(header::USER_AGENT, &self.config.user_agent)
            .header(header::REFERER, &self.config.base_url)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AuthError::Status(status.as_u16()));
        }
        response.bytes().await?;
        Ok(())
    }

    pub async fn login_with_retry(
        &self,
        credentials: &Credentials,
        policy: &RetryPolicy,
    ) -> Result<(), AuthError> {
        login_with_retry(policy, || self.login(credentials)).await
    }

    /// GET the portal base URL with the given query parameters. Non-200 is a
    /// scrape failure for this fetch; the body is decoded lossily because
    /// the portal occasionally emits broken byte sequences.
    pub async fn fetch_page(&self, query: &[(&str, String)]) -> Result<FetchedPage, FetchError> {
        let response = self
            .http
            .get(&self.config.base_url)
            .header(header::USER_AGENT, &self.config.user_agent)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let url = response.url().to_string();
        if status != StatusCode::OK {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let bytes = response.bytes().await?;
        let fingerprint = sha256_hex(&bytes);
        let body = String::from_utf8_lossy(&bytes).into_owned();
        debug!(url, bytes = bytes.len(), "fetched portal page");
        Ok(FetchedPage { body, fingerprint })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn cookie_jar_replaces_host_cookies_wholesale() {
        let jar = HostCookieJar::default();
        let url = Url::parse("http://portal.example/oper/").expect("url");

        let first = [HeaderValue::from_static("sid=abc; Path=/; HttpOnly")];
        jar.set_cookies(&mut first.iter(), &url);
        assert_eq!(
            jar.cookies(&url).expect("cookies").to_str().unwrap(),
            "sid=abc"
        );

        let second = [
            HeaderValue::from_static("sid=def; Path=/"),
            HeaderValue::from_static("lang=en"),
        ];
        jar.set_cookies(&mut second.iter(), &url);
        assert_eq!(
            jar.cookies(&url).expect("cookies").to_str().unwrap(),
            "sid=def; lang=en"
        );
    }

    #[test]
    fn cookie_jar_is_keyed_by_host() {
        let jar = HostCookieJar::default();
        let portal = Url::parse("http://portal.example/").expect("url");
        let other = Url::parse("http://other.example/").expect("url");

        let cookies = [HeaderValue::from_static("sid=abc")];
        jar.set_cookies(&mut cookies.iter(), &portal);

        assert!(jar.cookies(&other).is_none());
        assert!(jar.cookies(&portal).is_some());
    }

    #[test]
    fn retry_policy_delay_is_fixed() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), policy.delay_for_attempt(5));
    }

    #[tokio::test]
    async fn retry_exhaustion_wraps_last_cause() {
        let policy = RetryPolicy::without_delay(3);
        let attempts = std::sync::atomic::AtomicUsize::new(0);

        let result = login_with_retry(&policy, || {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            async move { Err(AuthError::Status(500 + n as u16)) }
        })
        .await;

        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
        match result {
            Err(AuthError::Exhausted { attempts: 3, last }) => {
                assert!(matches!(*last, AuthError::Status(503)));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retry_stops_on_first_success() {
        let policy = RetryPolicy::without_delay(3);
        let attempts = std::sync::atomic::AtomicUsize::new(0);

        let result = login_with_retry(&policy, || {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            async move {
                if n < 2 {
                    Err(AuthError::Status(502))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn session_rejection_covers_auth_statuses_only() {
        let rejected = FetchError::HttpStatus {
            status: 403,
            url: "http://portal.example".into(),
        };
        let failed = FetchError::HttpStatus {
            status: 500,
            url: "http://portal.example".into(),
        };
        assert!(rejected.is_session_rejected());
        assert!(!failed.is_session_rejected());
    }
}
