use bulkflow_config::RecoveryConfig;
use bulkflow_queue::QueueError;
use bulkflow_types::{
    ApiFailure, CategorizedError, ErrorCategory, ErrorCode, ErrorDetails, RecoveryStrategy,
    ResourceKind, Stage,
};
use std::sync::Arc;

use crate::context::{work_key, ExecutionContext};

/// What the classifier knows about where a failure happened
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationContext {
    /// Attempts made so far for the failing unit (1-based)
    pub attempt: u32,
    pub stage: Option<Stage>,
    pub resources_created_in_stage: usize,
    pub last_stable_stage: Option<Stage>,
    pub operation_id: Option<String>,
    pub resource_kind: Option<ResourceKind>,
    pub resource_id: Option<String>,
    pub work_key: Option<String>,
}

impl ClassificationContext {
    pub fn from_context(ctx: &ExecutionContext, attempt: u32) -> Self {
        Self {
            attempt,
            stage: Some(ctx.current_stage()),
            resources_created_in_stage: ctx.created_in_current_stage(),
            last_stable_stage: ctx.last_stable_stage(),
            operation_id: Some(ctx.operation_id().to_string()),
            ..Default::default()
        }
    }

    /// Point at the failing resource and its resubmittable unit of work
    pub fn with_resource(mut self, kind: ResourceKind, local_key: impl Into<String>) -> Self {
        let local_key = local_key.into();
        self.work_key = Some(work_key(kind, &local_key));
        self.resource_kind = Some(kind);
        self.resource_id = Some(local_key);
        self
    }

    pub fn with_work_key(mut self, work_key: impl Into<String>) -> Self {
        self.work_key = Some(work_key.into());
        self
    }

    fn details(&self, status: Option<u16>) -> ErrorDetails {
        ErrorDetails {
            attempt: self.attempt,
            stage: self.stage,
            last_stable_stage: self.last_stable_stage,
            operation_id: self.operation_id.clone(),
            resource_kind: self.resource_kind,
            resource_id: self.resource_id.clone(),
            work_key: self.work_key.clone(),
            status,
            extra: Default::default(),
        }
    }
}

/// Turns raw failures into categorized errors with a recovery strategy
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    max_attempts: u32,
}

impl ErrorClassifier {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(config.max_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pick the recovery strategy for a classified code
    pub fn select_strategy(&self, code: ErrorCode, ctx: &ClassificationContext) -> RecoveryStrategy {
        if code.is_retryable() && ctx.attempt < self.max_attempts {
            return if ctx.attempt <= 1 {
                RecoveryStrategy::ImmediateRetry
            } else {
                RecoveryStrategy::DelayedRetry
            };
        }

        if code.category() == ErrorCategory::System {
            return RecoveryStrategy::ManualIntervention;
        }

        if ctx.resources_created_in_stage > 0 {
            if ctx.last_stable_stage.is_some() {
                RecoveryStrategy::PartialRollback
            } else {
                RecoveryStrategy::FullRollback
            }
        } else {
            RecoveryStrategy::ManualIntervention
        }
    }

    pub fn classify(&self, failure: &ApiFailure, ctx: &ClassificationContext) -> CategorizedError {
        let code = failure.code();
        let strategy = self.select_strategy(code, ctx);

        CategorizedError::from_failure(failure, strategy).with_details(ctx.details(failure.status))
    }

    /// Classify a terminal queue outcome, using the attempts the queue made
    /// when it reports more than the caller knows about
    pub fn classify_queue_error(
        &self,
        error: &QueueError,
        ctx: &ClassificationContext,
    ) -> CategorizedError {
        let mut ctx = ctx.clone();
        ctx.attempt = ctx.attempt.max(error.attempts());

        if let Some(failure) = error.failure() {
            return self.classify(failure, &ctx);
        }

        let code = error.code();
        let strategy = self.select_strategy(code, &ctx);
        CategorizedError::new(code, strategy, error.to_string())
            .with_details(ctx.details(None))
            .with_cause(Arc::new(error.clone()))
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn ctx(attempt: u32, created: usize, last_stable: Option<Stage>) -> ClassificationContext {
        ClassificationContext {
            attempt,
            stage: Some(Stage::AdGroupCreation),
            resources_created_in_stage: created,
            last_stable_stage: last_stable,
            operation_id: Some("op-1".into()),
            ..Default::default()
        }
        .with_resource(ResourceKind::AdGroup, "g-1")
    }

    #[test]
    fn test_retryable_failures_retry_below_ceiling() {
        let classifier = ErrorClassifier::new(3);
        let rate_limited = ApiFailure::with_status(429, "slow down");

        let first = classifier.classify(&rate_limited, &ctx(1, 0, None));
        assert_eq!(first.code(), ErrorCode::RateLimit);
        assert_eq!(first.strategy(), RecoveryStrategy::ImmediateRetry);
        assert!(first.retryable());

        let second = classifier.classify(&rate_limited, &ctx(2, 0, None));
        assert_eq!(second.strategy(), RecoveryStrategy::DelayedRetry);
    }

    #[test]
    fn test_ceiling_breach_falls_through_to_rollback() {
        let classifier = ErrorClassifier::new(3);
        let failure = ApiFailure::with_status(503, "unavailable");

        let partial = classifier.classify(&failure, &ctx(3, 2, Some(Stage::CampaignCreation)));
        assert_eq!(partial.strategy(), RecoveryStrategy::PartialRollback);

        let full = classifier.classify(&failure, &ctx(3, 2, None));
        assert_eq!(full.strategy(), RecoveryStrategy::FullRollback);

        let manual = classifier.classify(&failure, &ctx(3, 0, Some(Stage::CampaignCreation)));
        assert_eq!(manual.strategy(), RecoveryStrategy::ManualIntervention);
    }

    #[test]
    fn test_validation_never_retries() {
        let classifier = ErrorClassifier::new(3);
        let failure = ApiFailure::with_status(400, "bad keyword text");

        let error = classifier.classify(&failure, &ctx(1, 1, Some(Stage::CampaignCreation)));

        assert_eq!(error.code(), ErrorCode::Validation);
        assert_eq!(error.category(), ErrorCategory::Validation);
        assert!(!error.retryable());
        assert!(!error.strategy().is_retry());
        assert_eq!(error.strategy(), RecoveryStrategy::PartialRollback);
    }

    #[test]
    fn test_message_patterns() {
        let classifier = ErrorClassifier::default();

        let network = classifier.classify(&ApiFailure::new("Connection reset"), &ctx(1, 0, None));
        assert_eq!(network.code(), ErrorCode::NetworkError);

        let timeout = classifier.classify(&ApiFailure::new("read TIMEOUT"), &ctx(1, 0, None));
        assert_eq!(timeout.code(), ErrorCode::Timeout);

        let unknown = classifier.classify(&ApiFailure::new("boom"), &ctx(1, 0, None));
        assert_eq!(unknown.code(), ErrorCode::Unknown);
        assert_eq!(unknown.strategy(), RecoveryStrategy::ManualIntervention);
    }

    #[test]
    fn test_details_carry_location() {
        let classifier = ErrorClassifier::default();
        let error = classifier.classify(
            &ApiFailure::with_status(404, "parent missing"),
            &ctx(1, 1, Some(Stage::CampaignCreation)),
        );

        let details = error.details();
        assert_eq!(details.stage, Some(Stage::AdGroupCreation));
        assert_eq!(details.last_stable_stage, Some(Stage::CampaignCreation));
        assert_eq!(details.work_key.as_deref(), Some("ad_group:g-1"));
        assert_eq!(details.resource_id.as_deref(), Some("g-1"));
        assert_eq!(details.status, Some(404));
        assert!(error.cause().is_some());
    }

    #[test]
    fn test_queue_exhaustion_uses_queue_attempts() {
        let classifier = ErrorClassifier::new(3);
        let error = QueueError::RetriesExhausted {
            id: Uuid::new_v4(),
            code: ErrorCode::ServerError,
            attempts: 4,
            failure: ApiFailure::with_status(500, "internal"),
        };

        let categorized = classifier.classify_queue_error(&error, &ctx(1, 1, None));

        assert_eq!(categorized.code(), ErrorCode::ServerError);
        assert_eq!(categorized.details().attempt, 4);
        assert_eq!(categorized.strategy(), RecoveryStrategy::FullRollback);
    }

    #[test]
    fn test_queue_timeout_is_retryable_system_error() {
        let classifier = ErrorClassifier::new(3);
        let error = QueueError::TimedOut {
            id: Uuid::new_v4(),
            timeout: Duration::from_secs(1),
        };

        let first = classifier.classify_queue_error(&error, &ctx(1, 0, None));
        assert_eq!(first.code(), ErrorCode::QueueTimeout);
        assert_eq!(first.category(), ErrorCategory::System);
        assert_eq!(first.strategy(), RecoveryStrategy::ImmediateRetry);

        let exhausted = classifier.classify_queue_error(&error, &ctx(3, 2, None));
        assert_eq!(exhausted.strategy(), RecoveryStrategy::ManualIntervention);
    }

    #[test]
    fn test_cancelled_goes_to_operator() {
        let classifier = ErrorClassifier::new(3);
        let error = QueueError::Cancelled {
            id: Uuid::new_v4(),
            attempts: 0,
        };

        let categorized = classifier.classify_queue_error(&error, &ctx(1, 3, None));

        assert_eq!(categorized.code(), ErrorCode::Cancelled);
        assert_eq!(categorized.strategy(), RecoveryStrategy::ManualIntervention);
    }
}
