//! 에러 분류 체계 - ledger API 호출 실패를 재시도 가능/불가능으로 구분
//!
//! Every failure that crosses the engine boundary is a [`LedgerError`].
//! [`classify`] turns one into an [`ErrorClass`]; the backoff controller only
//! retries the transient classes and everything else reaches the caller as is.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HTTP statuses Horizon (and the proxies in front of it) use for gateway timeouts
const TIMEOUT_STATUSES: [u16; 6] = [408, 504, 522, 524, 598, 599];

/// Bad caller input, rejected before any network call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid account id: {0}")]
    InvalidAccountId(String),

    #[error("memo query must not be empty")]
    EmptyMemoQuery,

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("date range: from {from} is after to {to}")]
    DateRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Non-success HTTP response. `result_codes` carries Horizon's
    /// `extras.result_codes` payload verbatim when present.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        result_codes: Option<serde_json::Value>,
        retry_after: Option<Duration>,
    },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        timeout: bool,
        connect: bool,
    },

    #[error("failed to decode ledger response: {0}")]
    Decode(String),

    #[error("ledger returned records out of order: {detail}")]
    PageOrder { detail: String },

    /// Local payment store failure
    #[error("payment store: {0}")]
    Store(String),

    #[error("no candidate was eligible for mutation")]
    NothingEligible,

    #[error("operation aborted")]
    Aborted,
}

impl LedgerError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            result_codes: None,
            retry_after: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timeout: false,
            connect: true,
        }
    }

    pub fn class(&self) -> ErrorClass {
        classify(self)
    }

    /// Server-provided wait hint (`Retry-After`), if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Classification of a failure
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ErrorClass {
    Timeout,
    RateLimit,
    Network,
    /// Structured rejection from the ledger API, detail kept verbatim for display
    Protocol { detail: String },
    NotFound,
    Validation,
    /// Caller-initiated cancellation, never shown as a failure
    Aborted,
    Unknown,
}

impl ErrorClass {
    /// Timeout, network and rate-limit failures may succeed on retry
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network | Self::RateLimit)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimit => "rateLimit",
            Self::Network => "network",
            Self::Protocol { .. } => "protocolError",
            Self::NotFound => "notFound",
            Self::Validation => "validation",
            Self::Aborted => "aborted",
            Self::Unknown => "unknown",
        }
    }
}

/// Pure, total classification of a ledger failure
pub fn classify(error: &LedgerError) -> ErrorClass {
    match error {
        LedgerError::Validation(_) => ErrorClass::Validation,
        LedgerError::Aborted => ErrorClass::Aborted,
        LedgerError::NothingEligible => ErrorClass::NotFound,
        LedgerError::PageOrder { detail } => ErrorClass::Protocol {
            detail: detail.clone(),
        },
        LedgerError::Decode(_) | LedgerError::Store(_) => ErrorClass::Unknown,
        LedgerError::Http {
            status,
            message,
            result_codes,
            ..
        } => {
            let message = message.to_lowercase();
            if *status == 404 {
                ErrorClass::NotFound
            } else if *status == 429 {
                ErrorClass::RateLimit
            } else if TIMEOUT_STATUSES.contains(status) || message.contains("timeout") {
                ErrorClass::Timeout
            } else if looks_like_network_failure(&message) {
                ErrorClass::Network
            } else if let Some(codes) = result_codes {
                ErrorClass::Protocol {
                    detail: codes.to_string(),
                }
            } else {
                ErrorClass::Unknown
            }
        }
        LedgerError::Transport {
            message,
            timeout,
            connect,
        } => {
            let message = message.to_lowercase();
            if *timeout || message.contains("timeout") || message.contains("timed out") {
                ErrorClass::Timeout
            } else if *connect || looks_like_network_failure(&message) {
                ErrorClass::Network
            } else {
                ErrorClass::Unknown
            }
        }
    }
}

fn looks_like_network_failure(message: &str) -> bool {
    ["failed to fetch", "networkerror", "network error", "connection", "dns"]
        .iter()
        .any(|needle| message.contains(needle))
}
