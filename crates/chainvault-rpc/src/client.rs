//! Base JSON-RPC 2.0 HTTP client.
//!
//! Provides `call()` for JSON-RPC methods, POSTed to the node endpoint.
//! Supports Basic auth, configurable timeout, and retry with exponential backoff.

use crate::error::RpcError;
use base64::Engine;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// JSON-RPC 2.0 request envelope.
#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

/// JSON-RPC response envelope.
///
/// Bitcoin Core answers legacy (1.0) requests with `error: null` on success
/// and HTTP 500 plus an error object on failure; 2.0 requests get HTTP 200
/// either way. Both shapes parse here.
#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error object.
#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Configuration for an RPC client.
#[derive(Clone)]
pub struct RpcConfig {
    /// Endpoint URL (e.g., `http://127.0.0.1:8332`).
    pub url: String,
    /// Optional username for Basic auth.
    pub username: Option<String>,
    /// Optional password for Basic auth.
    pub password: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Number of retry attempts on transient failure.
    pub retries: u32,
    /// Initial delay between retries (doubles each attempt).
    pub retry_delay: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
            retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl fmt::Debug for RpcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConfig")
            .field("url", &redact_url(&self.url))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

/// Scheme and host of a URL, dropping userinfo, path, and query, which
/// hosted providers use to carry access tokens.
pub fn redact_url(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((s, r)) => (s, r),
        None => ("", url),
    };
    let authority = rest.split(&['/', '?', '#'][..]).next().unwrap_or("");
    let host = authority.rsplit('@').next().unwrap_or(authority);
    if scheme.is_empty() {
        host.to_string()
    } else {
        format!("{}://{}", scheme, host)
    }
}

/// Async JSON-RPC client for a Bitcoin node.
pub struct RpcClient {
    client: reqwest::Client,
    config: RpcConfig,
    request_id: AtomicU64,
}

impl RpcClient {
    /// Create a new client with the given URL and default settings.
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Self::with_config(RpcConfig {
            url: url.to_string(),
            ..Default::default()
        })
    }

    /// Create a new client with full configuration.
    pub fn with_config(mut config: RpcConfig) -> Result<Self, RpcError> {
        config.url = config.url.trim_end_matches('/').to_string();
        if config.url.is_empty() {
            return Err(RpcError::Config("empty RPC URL".into()));
        }
        if config.username.is_some() != config.password.is_some() {
            return Err(RpcError::Config(
                "RPC username and password must be given together".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| RpcError::Config(e.to_string()))?;

        Ok(Self {
            client,
            config,
            request_id: AtomicU64::new(0),
        })
    }

    /// Get the configured endpoint URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Endpoint URL safe to print.
    pub fn display_url(&self) -> String {
        redact_url(&self.config.url)
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn auth_header(&self) -> Option<HeaderValue> {
        match (&self.config.username, &self.config.password) {
            (Some(user), Some(pass)) => {
                let creds = format!("{}:{}", user, pass);
                let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
                let mut value = HeaderValue::from_str(&format!("Basic {}", encoded)).ok()?;
                value.set_sensitive(true);
                Some(value)
            }
            _ => None,
        }
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(auth) = self.auth_header() {
            headers.insert(AUTHORIZATION, auth);
        }
        headers
    }

    /// Call a JSON-RPC 2.0 method.
    ///
    /// Transient failures are retried up to `retries` times; the last
    /// transient error is returned once attempts run out.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let attempts = self.config.retries + 1;
        let mut last_err = RpcError::NoResult {
            context: method.to_string(),
        };

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.config.retry_delay * 2u32.saturating_pow(attempt - 1);
                debug!("retrying {} in {:?} (attempt {}/{})", method, delay, attempt + 1, attempts);
                tokio::time::sleep(delay).await;
            }

            let req = JsonRpcRequest {
                jsonrpc: "2.0",
                id: self.next_id(),
                method,
                params: &params,
            };

            match self.do_call(&req).await {
                Ok(val) => return Ok(val),
                Err(e) => {
                    let should_retry = e.is_transient() && attempt + 1 < attempts;
                    if !should_retry {
                        return Err(e);
                    }
                    warn!("{} failed, will retry: {}", method, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    async fn do_call(&self, req: &JsonRpcRequest<'_>) -> Result<Value, RpcError> {
        let method = req.method;
        let resp = self
            .client
            .post(&self.config.url)
            .headers(self.build_headers())
            .json(req)
            .send()
            .await
            .map_err(|e| RpcError::Http {
                method: method.to_string(),
                source: e.without_url(),
            })?;

        let status = resp.status().as_u16();

        if status == 401 || status == 403 {
            return Err(RpcError::AuthFailed {
                method: method.to_string(),
            });
        }

        let body = resp.text().await.map_err(|e| RpcError::Http {
            method: method.to_string(),
            source: e.without_url(),
        })?;

        let parsed = serde_json::from_str::<JsonRpcResponse>(&body);

        if status >= 400 {
            // Legacy-protocol node errors arrive as HTTP 500 with a JSON body.
            if let Ok(JsonRpcResponse {
                error: Some(err), ..
            }) = parsed
            {
                return Err(rpc_error(err, method));
            }
            return Err(RpcError::HttpStatus {
                method: method.to_string(),
                status,
                body: body.chars().take(500).collect(),
            });
        }

        let envelope = parsed.map_err(|e| RpcError::Decode {
            context: format!("{} response envelope", method),
            source: e,
        })?;

        if let Some(err) = envelope.error {
            return Err(rpc_error(err, method));
        }

        envelope.result.ok_or(RpcError::NoResult {
            context: method.to_string(),
        })
    }
}

fn rpc_error(err: JsonRpcError, method: &str) -> RpcError {
    RpcError::Rpc {
        code: err.code,
        message: err.message,
        method: method.to_string(),
    }
}
