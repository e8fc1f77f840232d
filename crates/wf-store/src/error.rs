//! Structured domain error shared across every layer above the store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error category. Retryability is a fixed property of the category, not a
/// per-call decision -- the scheduler consults `ErrorCategory::is_retryable`
/// rather than inspecting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Execution,
    Timeout,
    RateLimit,
    State,
    Consensus,
    Auth,
    Network,
    NotFound,
    Conflict,
    Internal,
    Budget,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Execution | Self::Timeout | Self::RateLimit | Self::Network
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::State => "state",
            Self::Consensus => "consensus",
            Self::Auth => "auth",
            Self::Network => "network",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
            Self::Budget => "budget",
        };
        f.write_str(s)
    }
}

impl FromStr for ErrorCategory {
    type Err = ErrorCategoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation" => Ok(Self::Validation),
            "execution" => Ok(Self::Execution),
            "timeout" => Ok(Self::Timeout),
            "rate_limit" => Ok(Self::RateLimit),
            "state" => Ok(Self::State),
            "consensus" => Ok(Self::Consensus),
            "auth" => Ok(Self::Auth),
            "network" => Ok(Self::Network),
            "not_found" => Ok(Self::NotFound),
            "conflict" => Ok(Self::Conflict),
            "internal" => Ok(Self::Internal),
            "budget" => Ok(Self::Budget),
            other => Err(ErrorCategoryParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorCategoryParseError(pub String);

impl fmt::Display for ErrorCategoryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error category: {:?}", self.0)
    }
}

impl std::error::Error for ErrorCategoryParseError {}

/// Structured domain-level error. `retryable` is derived from `category` at
/// construction and never set independently, so the two can't drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub cause: Option<Box<DomainError>>,
    pub details: serde_json::Value,
}

impl DomainError {
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            retryable: category.is_retryable(),
            code: code.into(),
            message: message.into(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_cause(mut self, cause: DomainError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn dag_cycle() -> Self {
        Self::new(
            ErrorCategory::Execution,
            "DAG_CYCLE",
            "remaining tasks form a dependency cycle and can never become ready",
        )
    }

    pub fn human_review_required(score: f64, human_threshold: f64) -> Self {
        Self::new(
            ErrorCategory::Consensus,
            "HUMAN_REVIEW_REQUIRED",
            "consensus score fell below the warning threshold",
        )
        .with_details(serde_json::json!({ "score": score, "human_threshold": human_threshold }))
    }

    pub fn user_cancel() -> Self {
        Self::new(ErrorCategory::Execution, "USER_CANCEL", "user cancel")
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Conflict, code, message)
    }

    pub fn state(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::State, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, code, message)
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}] {}", self.category, self.code, self.message)
    }
}

impl std::error::Error for DomainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(e: sqlx::Error) -> Self {
        DomainError::new(ErrorCategory::Internal, "STORE_ERROR", e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_roundtrip() {
        for c in [
            ErrorCategory::Validation,
            ErrorCategory::Execution,
            ErrorCategory::Timeout,
            ErrorCategory::RateLimit,
            ErrorCategory::State,
            ErrorCategory::Consensus,
            ErrorCategory::Auth,
            ErrorCategory::Network,
            ErrorCategory::NotFound,
            ErrorCategory::Conflict,
            ErrorCategory::Internal,
            ErrorCategory::Budget,
        ] {
            assert_eq!(c.to_string().parse::<ErrorCategory>().unwrap(), c);
        }
    }

    #[test]
    fn retryability_fixed_by_category() {
        assert!(!ErrorCategory::Validation.is_retryable());
        assert!(!ErrorCategory::State.is_retryable());
        assert!(!ErrorCategory::Consensus.is_retryable());
        assert!(!ErrorCategory::Auth.is_retryable());
        assert!(!ErrorCategory::NotFound.is_retryable());
        assert!(!ErrorCategory::Budget.is_retryable());
        assert!(ErrorCategory::Execution.is_retryable());
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(ErrorCategory::RateLimit.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
    }

    #[test]
    fn constructors_set_retryable_from_category() {
        let e = DomainError::dag_cycle();
        assert_eq!(e.category, ErrorCategory::Execution);
        assert!(e.retryable);

        let e = DomainError::human_review_required(0.42, 0.5);
        assert_eq!(e.category, ErrorCategory::Consensus);
        assert!(!e.retryable);
        assert_eq!(e.details["score"], 0.42);
    }

    #[test]
    fn cause_chain_via_source() {
        let root = DomainError::new(ErrorCategory::Network, "CONN_RESET", "connection reset");
        let wrapped =
            DomainError::new(ErrorCategory::Execution, "AGENT_CALL_FAILED", "agent call failed")
                .with_cause(root);
        let source = std::error::Error::source(&wrapped).expect("should have a cause");
        assert!(source.to_string().contains("CONN_RESET"));
    }
}
