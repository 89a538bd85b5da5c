//! HTTP destination that POSTs each message body to a fixed URL.
//!
//! The blocking client is built on the worker thread in `connect` and
//! dropped in `disconnect`, so a reconnect always starts from a fresh
//! connection pool.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sinkline_core::{ActionResult, Message};
use tracing::{debug, warn};

use super::{Outcome, Transport, WorkerInfo};
use crate::error::{DeliveryError, Result};

/// Responses larger than this are truncated before rule matching.
pub const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;

/// Configuration for the HTTP destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Target URL; every message is POSTed here.
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Extra headers added to every request.
    pub headers: HashMap<String, String>,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
    /// Content type sent with every payload.
    pub content_type: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(30),
            user_agent: format!("sinkline/{}", env!("CARGO_PKG_VERSION")),
            headers: HashMap::new(),
            max_redirects: 3,
            verify_tls: true,
            content_type: "application/octet-stream".to_string(),
        }
    }
}

impl HttpConfig {
    /// Default configuration targeting `url`.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }
}

/// Transport delivering messages as HTTP POST requests.
#[derive(Debug)]
pub struct HttpTransport {
    config: HttpConfig,
    client: Option<reqwest::blocking::Client>,
    worker_id: Option<usize>,
}

impl HttpTransport {
    /// Creates a transport after validating the configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the URL cannot be
    /// parsed or does not use http or https.
    pub fn new(config: HttpConfig) -> Result<Self> {
        let url = reqwest::Url::parse(&config.url).map_err(|e| {
            DeliveryError::configuration(format!("invalid url {:?}: {e}", config.url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeliveryError::configuration(format!(
                "unsupported url scheme {:?}",
                url.scheme()
            )));
        }

        Ok(Self { config, client: None, worker_id: None })
    }

    /// Active configuration.
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Whether a client is currently built.
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn build_client(&self) -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(&self.config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(self.config.max_redirects as usize))
            .danger_accept_invalid_certs(!self.config.verify_tls)
            .build()
            .map_err(|e| DeliveryError::connect(format!("failed to build HTTP client: {e}")))
    }
}

impl Transport for HttpTransport {
    fn thread_init(&mut self, worker: &WorkerInfo) -> Result<()> {
        self.worker_id = Some(worker.worker_id);
        Ok(())
    }

    fn connect(&mut self) -> Result<()> {
        if self.client.is_none() {
            self.client = Some(self.build_client()?);
            debug!(worker_id = ?self.worker_id, url = %self.config.url, "http client ready");
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.client.take().is_some() {
            debug!(worker_id = ?self.worker_id, url = %self.config.url, "http client released");
        }
    }

    fn deliver(&mut self, message: &Message) -> Outcome {
        let Some(client) = self.client.as_ref() else {
            return Outcome::Action(ActionResult::NotConnected);
        };
        let start_time = Instant::now();

        let mut request = client
            .post(&self.config.url)
            .body(message.payload.to_vec())
            .header("content-type", &self.config.content_type);

        for (key, value) in &self.config.headers {
            if !is_managed_header(key) {
                request = request.header(key, value);
            }
        }

        request = request
            .header("X-Sinkline-Message-Id", message.id.to_string())
            .header("X-Sinkline-Attempt", message.attempts.saturating_add(1).to_string());

        let response = match request.send() {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    duration_ms = start_time.elapsed().as_millis(),
                    "request failed: {}",
                    e
                );
                if e.is_timeout() || e.is_connect() {
                    return Outcome::Action(ActionResult::NotConnected);
                }
                return Outcome::Action(ActionResult::Error);
            },
        };

        let status_code = i64::from(response.status().as_u16());
        let body = match response.bytes() {
            Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_SIZE => {
                bytes.slice(..MAX_RESPONSE_BODY_SIZE)
            },
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(message_id = %message.id, "failed to read response body: {}", e);
                Bytes::new()
            },
        };

        debug!(
            message_id = %message.id,
            status = status_code,
            duration_ms = start_time.elapsed().as_millis(),
            "received response"
        );

        Outcome::Response { status_code, body }
    }

    fn default_action(&self, status_code: i64, _body: &[u8]) -> ActionResult {
        match status_code {
            200..=299 => ActionResult::Success,
            408 | 429 => ActionResult::NotConnected,
            400..=499 => ActionResult::Drop,
            501 | 505 => ActionResult::Drop,
            500..=599 => ActionResult::NotConnected,
            _ => ActionResult::Error,
        }
    }
}

/// Headers the transport sets itself and never copies from configuration.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_lowercase();
    matches!(
        lowercase.as_str(),
        "content-length"
            | "content-type"
            | "host"
            | "user-agent"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "x-sinkline-message-id"
            | "x-sinkline-attempt"
    )
}
