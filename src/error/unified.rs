//! Error classification and recovery hints.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ProviderLifecycle,
    ToolInvocation,
    Configuration,
    Summarization,
    ModelEndpoint,
    Authentication,
    RateLimit,
    Network,
    Serialization,
    Internal,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Restart the session so the provider subprocess is relaunched.
    RestartProvider,
    /// Nothing to do; the model sees the failure as a tool result.
    LetModelRecover,
    RetryNextTurn,
    CheckConfiguration,
    CheckCredentials,
    RetryLater,
    ReportBug,
}
