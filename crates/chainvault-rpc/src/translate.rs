//! Natural-language to SQL translation.
//!
//! A narrow seam: given a question and the database schema, produce one SQL
//! statement. `ChatTranslator` talks to any OpenAI-compatible
//! chat-completions endpoint. The SQL it returns is untrusted; callers must
//! execute it through a read-only connection.

use crate::error::RpcError;
use log::debug;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You translate questions about a Bitcoin block index into SQLite SQL. \
Answer with exactly one read-only SELECT statement and nothing else. \
Amounts in tx_output.value are satoshis. The table named transaction must be quoted as \"transaction\".";

/// Turns a question into SQL text.
pub trait SqlTranslator: Send + Sync {
    fn translate(
        &self,
        question: &str,
        schema: &str,
    ) -> impl Future<Output = Result<String, RpcError>> + Send;
}

/// Configuration for [`ChatTranslator`].
#[derive(Clone)]
pub struct TranslatorConfig {
    /// Chat-completions URL (e.g., `https://api.openai.com/v1/chat/completions`).
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl fmt::Debug for TranslatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatorConfig")
            .field("url", &crate::client::redact_url(&self.url))
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Translator backed by a hosted chat model.
pub struct ChatTranslator {
    client: reqwest::Client,
    config: TranslatorConfig,
}

impl ChatTranslator {
    pub fn new(config: TranslatorConfig) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RpcError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn request<'a>(&'a self, question: &str, schema: &str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: format!("{}\n\nSchema:\n{}", SYSTEM_PROMPT, schema),
                },
                ChatMessage {
                    role: "user".into(),
                    content: question.to_string(),
                },
            ],
            temperature: 0.0,
        }
    }
}

impl SqlTranslator for ChatTranslator {
    async fn translate(&self, question: &str, schema: &str) -> Result<String, RpcError> {
        let method = "chat.completions";
        let mut req = self.client.post(&self.config.url).json(&self.request(question, schema));
        if let Some(key) = &self.config.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| RpcError::Config("API key is not a valid header value".into()))?;
            value.set_sensitive(true);
            req = req.header(AUTHORIZATION, value);
        }

        let resp = req.send().await.map_err(|e| RpcError::Http {
            method: method.into(),
            source: e.without_url(),
        })?;
        let status = resp.status().as_u16();
        if status == 401 || status == 403 {
            return Err(RpcError::AuthFailed {
                method: method.into(),
            });
        }
        let body = resp.text().await.map_err(|e| RpcError::Http {
            method: method.into(),
            source: e.without_url(),
        })?;
        if status >= 400 {
            return Err(RpcError::HttpStatus {
                method: method.into(),
                status,
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| RpcError::Decode {
            context: method.into(),
            source: e,
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(RpcError::NoResult {
                context: method.into(),
            })?;
        debug!("model replied: {}", content);

        let sql = extract_sql(&content);
        if sql.is_empty() {
            return Err(RpcError::NoResult {
                context: method.into(),
            });
        }
        Ok(sql)
    }
}

/// Strip Markdown code fences and surrounding prose from a model reply.
pub fn extract_sql(reply: &str) -> String {
    let text = reply.trim();
    let body = match text.find("```") {
        Some(start) => {
            let after = &text[start + 3..];
            // Skip an optional language tag on the fence line.
            let after = match after.find('\n') {
                Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
                    &after[nl + 1..]
                }
                _ => after,
            };
            match after.find("```") {
                Some(end) => &after[..end],
                None => after,
            }
        }
        None => text,
    };
    body.trim().to_string()
}
