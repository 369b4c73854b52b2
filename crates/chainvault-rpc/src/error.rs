//! RPC error types.
//!
//! Errors never carry the endpoint URL or credentials: hosted node URLs
//! commonly embed an access token in the path.

use thiserror::Error;

/// JSON-RPC error codes used by Bitcoin Core.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Invalid, missing or duplicate parameter ("Block height out of range").
    pub const RPC_INVALID_PARAMETER: i64 = -8;
    /// Invalid address or key ("Block not found").
    pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
    /// Node is still starting up.
    pub const RPC_IN_WARMUP: i64 = -28;
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP request for {method} failed: {source}")]
    Http {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {method}: {body}")]
    HttpStatus {
        method: String,
        status: u16,
        body: String,
    },

    #[error("RPC error {code} from {method}: {message}")]
    Rpc {
        code: i64,
        message: String,
        method: String,
    },

    #[error("no result in response to {context}")]
    NoResult { context: String },

    #[error("authentication failed for {method}")]
    AuthFailed { method: String },

    #[error("failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected response to {context}: {detail}")]
    Unexpected { context: String, detail: String },

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl RpcError {
    /// Network failures, timeouts, server-side 5xx/429, and node warm-up.
    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { source, .. } => !source.is_builder(),
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::Rpc { code, .. } => *code == codes::RPC_IN_WARMUP,
            _ => false,
        }
    }

    /// The node answered well-formed but reported the height or block does
    /// not exist (yet).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Rpc { code, .. }
                if *code == codes::RPC_INVALID_PARAMETER
                    || *code == codes::RPC_INVALID_ADDRESS_OR_KEY
        )
    }

    /// Payload arrived but does not have the expected shape.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}
