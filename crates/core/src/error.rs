//! Error types for the FlowPilot domain.
//!
//! Each bounded context has its own error enum; `RunError` is the
//! controller-level outcome that decides which terminal event a run emits.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Why a run stopped before producing an answer.
///
/// `Cancelled` maps to the `cancelled` terminal event; every other variant
/// maps to `error` with the display string as the reason.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("execution cancelled")]
    Cancelled,

    #[error("iteration limit exceeded")]
    IterationLimitExceeded { limit: u32 },

    #[error("execution time limit exceeded")]
    TimeLimitExceeded { limit_secs: f64 },

    #[error("model call failed: {0}")]
    Model(#[from] ProviderError),

    #[error("phase '{phase}' failed: {reason}")]
    PhaseFailed { phase: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl RunError {
    /// Whether this outcome is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn iteration_limit_reason_is_stable() {
        let err = RunError::IterationLimitExceeded { limit: 30 };
        assert_eq!(err.to_string(), "iteration limit exceeded");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn phase_failure_names_the_phase() {
        let err = RunError::PhaseFailed {
            phase: "search".into(),
            reason: "index offline".into(),
        };
        assert!(err.to_string().contains("search"));
        assert!(err.to_string().contains("index offline"));
    }

    #[test]
    fn cancelled_is_distinct() {
        assert!(RunError::Cancelled.is_cancelled());
    }
}
