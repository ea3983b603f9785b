use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, StatusCode};
use url::Url;

use crate::config::Config;
use crate::error::SyncError;
use crate::metrics::record_fetch_attempt;
use crate::models::{RemoteAnswer, RemoteAnswerPage};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Usernames land in a path segment, so everything outside the unreserved
/// set gets encoded, slashes included.
const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// What one hydration fetch produced. Only `Answers` carries data; the other
/// two are quiet outcomes the caller logs and drops.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Sync is disabled or no base URL is configured.
    Skipped,
    /// The remote authority answered 404: the endpoint is not deployed.
    EndpointAbsent,
    Answers(Vec<RemoteAnswer>),
}

/// HTTP client for the remote answer authority. Owns the retry policy; a
/// 404 is terminal while transport errors, 5xx and undecodable bodies are
/// retried with linearly growing delays.
pub struct RemoteAnswerFetcher {
    base_url: Option<Url>,
    http: Client,
    retry: RetryConfig,
}

impl RemoteAnswerFetcher {
    pub fn new(config: &Config) -> Result<Self, SyncError> {
        let mut base_url = None;
        if config.sync_enabled {
            if let Some(raw) = &config.base_url {
                let parsed = Url::parse(raw).map_err(|e| SyncError::InvalidBaseUrl {
                    url: raw.clone(),
                    reason: e.to_string(),
                })?;
                if parsed.host_str().is_none() {
                    return Err(SyncError::InvalidBaseUrl {
                        url: raw.clone(),
                        reason: "missing host".to_string(),
                    });
                }
                base_url = Some(parsed);
            }
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            base_url,
            http,
            retry: RetryConfig {
                max_attempts: config.retry_max_attempts,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                ..RetryConfig::default()
            },
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// Fetches every previously submitted answer of `username`. Never panics
    /// and never blocks longer than `max_attempts` timed-out requests plus
    /// the backoff sleeps between them.
    pub async fn fetch(&self, username: &str) -> Result<FetchOutcome, SyncError> {
        let Some(base) = &self.base_url else {
            return Ok(FetchOutcome::Skipped);
        };
        if username.trim().is_empty() {
            return Err(SyncError::MissingUsername);
        }

        let url = answers_url(base, username);
        let attempts = self.retry.max_attempts;

        let result = retry_async_with_config(self.retry.clone(), SyncError::is_transient, || {
            self.attempt(url.clone())
        })
        .await;

        match result {
            Ok(answers) => Ok(FetchOutcome::Answers(answers)),
            Err(SyncError::EndpointAbsent) => Ok(FetchOutcome::EndpointAbsent),
            Err(SyncError::Transient { status, message }) => {
                let last_error = match status {
                    Some(code) => format!("status {}: {}", code, message),
                    None => message,
                };
                Err(SyncError::ExhaustedRetries {
                    attempts,
                    last_error,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn attempt(&self, url: Url) -> Result<Vec<RemoteAnswer>, SyncError> {
        let response = self.http.get(url).send().await.map_err(|e| {
            record_fetch_attempt("transient");
            SyncError::Transient {
                status: None,
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            record_fetch_attempt("absent");
            return Err(SyncError::EndpointAbsent);
        }
        if !status.is_success() {
            record_fetch_attempt("transient");
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable body".to_string());
            return Err(SyncError::Transient {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let page: RemoteAnswerPage = response.json().await.map_err(|e| {
            record_fetch_attempt("transient");
            SyncError::Transient {
                status: None,
                message: format!("undecodable answer page: {}", e),
            }
        })?;

        if page.count != page.data.len() as u64 {
            tracing::debug!(
                "answer page count {} disagrees with payload length {}",
                page.count,
                page.data.len()
            );
        }

        record_fetch_attempt("success");
        Ok(page.data)
    }

    /// Cheap reachability check against the authority's health endpoint.
    /// Used by the diagnostic binary, never by the hydration path itself.
    pub async fn probe_health(&self) -> bool {
        let Some(base) = &self.base_url else {
            return false;
        };

        let mut url = base.clone();
        url.set_path(&format!("{}/health", url.path().trim_end_matches('/')));

        match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                response.json::<serde_json::Value>().await.is_ok()
            }
            _ => false,
        }
    }
}

fn answers_url(base: &Url, username: &str) -> Url {
    let encoded = utf8_percent_encode(username, PATH_SEGMENT_ENCODE_SET).to_string();
    let mut url = base.clone();
    url.set_path(&format!(
        "{}/api/user-answers/{}",
        url.path().trim_end_matches('/'),
        encoded
    ));
    url
}
