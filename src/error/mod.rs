//! Error types for the agent core.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all agent-core operations.
///
/// Tool-layer failures normally never reach a caller of
/// [`AgentSession::run`](crate::agent::AgentSession::run): the registry turns
/// them into in-band tool results. What does surface here carries enough
/// context (provider id, tool name, turn index) to reproduce the failure.
#[derive(Error, Debug)]
pub enum FinOpsError {
    #[error("Provider '{provider_id}' failed to start: {reason}")]
    ProviderStart { provider_id: String, reason: String },

    #[error("Provider '{provider_id}' is not ready (state: {state})")]
    ProviderNotReady { provider_id: String, state: String },

    #[error("Provider '{provider_id}' crashed: {reason}")]
    ProviderCrashed { provider_id: String, reason: String },

    #[error("Tool '{tool_name}' on provider '{provider_id}' failed: {cause}")]
    ToolInvocation {
        provider_id: String,
        tool_name: String,
        cause: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Summarization failed at turn {turn_index}: {message}")]
    Summarization { turn_index: usize, message: String },

    #[error("Model endpoint error{}: {message}", fmt_endpoint_context(.turn_index, .status))]
    ModelEndpoint {
        turn_index: Option<usize>,
        status: Option<u16>,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

fn fmt_endpoint_context(turn_index: &Option<usize>, status: &Option<u16>) -> String {
    match (turn_index, status) {
        (Some(turn), Some(status)) => format!(" (turn {turn}, status {status})"),
        (Some(turn), None) => format!(" (turn {turn})"),
        (None, Some(status)) => format!(" (status {status})"),
        (None, None) => String::new(),
    }
}

impl FinOpsError {
    /// Create a model endpoint error from an HTTP status and body.
    pub fn endpoint_status(status: u16, message: impl Into<String>) -> Self {
        Self::ModelEndpoint {
            turn_index: None,
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create a model endpoint error without HTTP context.
    pub fn endpoint(message: impl Into<String>) -> Self {
        Self::ModelEndpoint {
            turn_index: None,
            status: None,
            message: message.into(),
        }
    }

    /// Re-express any error raised while talking to the model as a
    /// `ModelEndpoint` error tagged with the turn it happened in.
    pub fn at_turn(self, turn: usize) -> Self {
        match self {
            Self::ModelEndpoint {
                status, message, ..
            } => Self::ModelEndpoint {
                turn_index: Some(turn),
                status,
                message,
            },
            Self::Summarization { message, .. } => Self::Summarization {
                turn_index: turn,
                message,
            },
            other => Self::ModelEndpoint {
                turn_index: Some(turn),
                status: None,
                message: other.to_string(),
            },
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ProviderStart { .. }
            | Self::ProviderNotReady { .. }
            | Self::ProviderCrashed { .. } => ErrorCategory::ProviderLifecycle,
            Self::ToolInvocation { .. } => ErrorCategory::ToolInvocation,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Summarization { .. } => ErrorCategory::Summarization,
            Self::ModelEndpoint { status, .. } => match status {
                Some(401 | 403) => ErrorCategory::Authentication,
                Some(429) => ErrorCategory::RateLimit,
                _ => ErrorCategory::ModelEndpoint,
            },
            Self::Network(_) => ErrorCategory::Network,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Io(_) | Self::InvalidState(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the session can keep going after this error.
    ///
    /// Model endpoint and configuration failures are the hard ones.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::ProviderLifecycle
                | ErrorCategory::ToolInvocation
                | ErrorCategory::Summarization
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::ProviderLifecycle => RecoverySuggestion::RestartProvider,
            ErrorCategory::ToolInvocation => RecoverySuggestion::LetModelRecover,
            ErrorCategory::Summarization => RecoverySuggestion::RetryNextTurn,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::ModelEndpoint => {
                RecoverySuggestion::RetryLater
            }
            ErrorCategory::Serialization | ErrorCategory::Internal => {
                RecoverySuggestion::ReportBug
            }
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, FinOpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_turn_keeps_status_and_attaches_turn_index() {
        let err = FinOpsError::endpoint_status(503, "overloaded").at_turn(4);

        match &err {
            FinOpsError::ModelEndpoint {
                turn_index, status, ..
            } => {
                assert_eq!(*turn_index, Some(4));
                assert_eq!(*status, Some(503));
            }
            other => panic!("expected ModelEndpoint, got {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "Model endpoint error (turn 4, status 503): overloaded"
        );
    }

    #[test]
    fn at_turn_wraps_transport_errors_as_endpoint_errors() {
        let err = FinOpsError::InvalidState("stream ended early".into()).at_turn(2);

        assert!(matches!(
            err,
            FinOpsError::ModelEndpoint { turn_index: Some(2), status: None, ref message }
                if message.contains("stream ended early")
        ));
    }

    #[test]
    fn tool_and_provider_errors_are_recoverable() {
        let tool = FinOpsError::ToolInvocation {
            provider_id: "billing".into(),
            tool_name: "get_cost".into(),
            cause: "boom".into(),
        };
        let crash = FinOpsError::ProviderCrashed {
            provider_id: "billing".into(),
            reason: "exited".into(),
        };

        assert!(tool.is_recoverable());
        assert!(crash.is_recoverable());
        assert!(!FinOpsError::Config("no rate".into()).is_recoverable());
        assert!(!FinOpsError::endpoint("down").is_recoverable());
    }

    #[test]
    fn auth_statuses_are_classified_separately() {
        assert_eq!(
            FinOpsError::endpoint_status(403, "denied").category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            FinOpsError::endpoint_status(429, "slow down").recovery_suggestion(),
            RecoverySuggestion::RetryLater
        );
    }
}
