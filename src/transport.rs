// ABOUTME: HTTP transport shared by every site: one client, one cookie jar
// ABOUTME: GET/POST returning response bodies; non-2xx and I/O failures become Network errors

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use sechat_core::config::HttpConfig;
use sechat_core::{ChatError, ChatResult};
use std::time::Duration;

/// Request/response seam over the chat servers.
///
/// Bodies are returned as text. `post` sends an already form-encoded body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> ChatResult<String>;
    async fn post(&self, url: &str, form_body: &str) -> ChatResult<String>;
}

/// Form-encode pairs in the given order
pub fn encode_form<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers
}

fn network_error(url: &str, err: reqwest::Error) -> ChatError {
    ChatError::Network(format!("{} ({})", err, url))
}

/// reqwest-backed transport with a shared cookie store
pub struct HttpTransport {
    client: reqwest::Client,
    post_retries: u32,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(&config.user_agent)
            .default_headers(default_headers())
            .cookie_store(true)
            .gzip(true)
            .deflate(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            post_retries: config.post_retries,
        })
    }

    async fn read_body(url: &str, response: reqwest::Response) -> ChatResult<String> {
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Network(format!("HTTP {} for {}", status, url)));
        }
        response.text().await.map_err(|e| network_error(url, e))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> ChatResult<String> {
        tracing::trace!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(url, e))?;
        Self::read_body(url, response).await
    }

    /// Chat POSTs are not idempotent, so only a request that never reached the
    /// server (connection not established) is sent again.
    async fn post(&self, url: &str, form_body: &str) -> ChatResult<String> {
        let mut attempt = 0;
        loop {
            tracing::trace!(url = %url, attempt, "POST");
            let result = self
                .client
                .post(url)
                .body(form_body.to_string())
                .send()
                .await;
            match result {
                Ok(response) => return Self::read_body(url, response).await,
                Err(e) if e.is_connect() && attempt < self.post_retries => {
                    attempt += 1;
                    tracing::warn!(url = %url, attempt, error = %e, "POST failed, retrying");
                }
                Err(e) => return Err(network_error(url, e)),
            }
        }
    }
}
