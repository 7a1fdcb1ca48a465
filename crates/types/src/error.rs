use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::{ApiFailure, ErrorCategory, ErrorCode, ResourceKind, Stage};

/// Response class chosen for a categorized error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    ImmediateRetry,
    DelayedRetry,
    PartialRollback,
    FullRollback,
    ManualIntervention,
}

impl RecoveryStrategy {
    pub const ALL: [RecoveryStrategy; 5] = [
        RecoveryStrategy::ImmediateRetry,
        RecoveryStrategy::DelayedRetry,
        RecoveryStrategy::PartialRollback,
        RecoveryStrategy::FullRollback,
        RecoveryStrategy::ManualIntervention,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::ImmediateRetry => "IMMEDIATE_RETRY",
            RecoveryStrategy::DelayedRetry => "DELAYED_RETRY",
            RecoveryStrategy::PartialRollback => "PARTIAL_ROLLBACK",
            RecoveryStrategy::FullRollback => "FULL_ROLLBACK",
            RecoveryStrategy::ManualIntervention => "MANUAL_INTERVENTION",
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            RecoveryStrategy::ImmediateRetry | RecoveryStrategy::DelayedRetry
        )
    }

    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            RecoveryStrategy::PartialRollback | RecoveryStrategy::FullRollback
        )
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown recovery strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for RecoveryStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecoveryStrategy::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

/// Typed context attached to a categorized error
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Attempt number that produced the failure (1-based)
    pub attempt: u32,
    pub stage: Option<Stage>,
    pub last_stable_stage: Option<Stage>,
    pub operation_id: Option<String>,
    pub resource_kind: Option<ResourceKind>,
    /// Local key or remote id of the offending resource
    pub resource_id: Option<String>,
    /// Key of the pending unit of work that can be resubmitted
    pub work_key: Option<String>,
    pub status: Option<u16>,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A failure turned into an actionable decision.
///
/// Immutable once built: fields are only reachable through accessors and the
/// builder methods consume `self`.
#[derive(Debug, Clone)]
pub struct CategorizedError {
    code: ErrorCode,
    category: ErrorCategory,
    strategy: RecoveryStrategy,
    retryable: bool,
    message: String,
    details: ErrorDetails,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl CategorizedError {
    pub fn new(code: ErrorCode, strategy: RecoveryStrategy, message: impl Into<String>) -> Self {
        Self {
            code,
            category: code.category(),
            strategy,
            retryable: code.is_retryable(),
            message: message.into(),
            details: ErrorDetails::default(),
            cause: None,
        }
    }

    /// Wrap a raw API failure, keeping it as the underlying cause
    pub fn from_failure(failure: &ApiFailure, strategy: RecoveryStrategy) -> Self {
        let mut error = Self::new(failure.code(), strategy, failure.message.clone());
        error.details.status = failure.status;
        error.cause = Some(Arc::new(failure.clone()));
        error
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    pub fn with_cause(mut self, cause: Arc<dyn StdError + Send + Sync>) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn strategy(&self) -> RecoveryStrategy {
        self.strategy
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn cause(&self) -> Option<&Arc<dyn StdError + Send + Sync>> {
        self.cause.as_ref()
    }
}

impl fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {} [strategy: {}]",
            self.code, self.category, self.message, self.strategy
        )
    }
}

impl StdError for CategorizedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse_rejects_unknown() {
        assert_eq!(
            "delayed_retry".parse::<RecoveryStrategy>().unwrap(),
            RecoveryStrategy::DelayedRetry
        );
        assert_eq!(
            "SELF_HEAL".parse::<RecoveryStrategy>(),
            Err(UnknownStrategy("SELF_HEAL".to_string()))
        );
    }

    #[test]
    fn test_from_failure_keeps_cause_and_status() {
        let failure = ApiFailure::with_status(429, "quota exhausted");
        let error = CategorizedError::from_failure(&failure, RecoveryStrategy::DelayedRetry);

        assert_eq!(error.code(), ErrorCode::RateLimit);
        assert_eq!(error.category(), ErrorCategory::ApiLimit);
        assert!(error.retryable());
        assert_eq!(error.details().status, Some(429));
        assert_eq!(error.source().unwrap().to_string(), "[429] quota exhausted");
    }

    #[test]
    fn test_display() {
        let error = CategorizedError::new(
            ErrorCode::Validation,
            RecoveryStrategy::ManualIntervention,
            "budget must be positive",
        );
        assert_eq!(
            error.to_string(),
            "VALIDATION (VALIDATION): budget must be positive [strategy: MANUAL_INTERVENTION]"
        );
        assert!(!error.retryable());
    }
}
