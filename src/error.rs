//! Error types for the content pipeline
//!
//! Synchronous failures (validation, lookups, lock conflicts) are returned
//! directly from resolver and orchestrator calls. Stage failures and timeouts
//! never cross the submission boundary; they are recorded on the task.

use crate::agents::AgentType;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Maximum length of an error message exposed to clients or stored on a task
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

/// Main error type for pipeline and configuration operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Stage {stage} failed: {message}")]
    StageExecution { stage: AgentType, message: String },

    #[error("Task exceeded maximum duration of {max_duration:?} during stage {stage}")]
    Timeout {
        stage: AgentType,
        max_duration: Duration,
    },

    #[error("Concurrent write conflict: {message}")]
    ConcurrencyConflict { message: String },

    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("LLM provider error: {0}")]
    Llm(#[from] crate::llm::provider::LlmError),
}

/// Stable machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    StageExecutionError,
    Timeout,
    ConcurrencyConflict,
    InternalError,
}

/// Error details returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
}

/// Error envelope returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: ErrorDetails,
}

impl PipelineError {
    /// Machine-readable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Validation { .. } => ErrorCode::ValidationError,
            PipelineError::NotFound { .. } => ErrorCode::NotFound,
            PipelineError::StageExecution { .. } => ErrorCode::StageExecutionError,
            PipelineError::Timeout { .. } => ErrorCode::Timeout,
            PipelineError::ConcurrencyConflict { .. } => ErrorCode::ConcurrencyConflict,
            PipelineError::InvalidTransition { .. }
            | PipelineError::Internal { .. }
            | PipelineError::Config(_)
            | PipelineError::Llm(_) => ErrorCode::InternalError,
        }
    }

    /// HTTP status used when this error is returned synchronously
    pub fn status_code(&self) -> u16 {
        match self.code() {
            ErrorCode::ValidationError => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::ConcurrencyConflict => 409,
            ErrorCode::Timeout => 504,
            ErrorCode::StageExecutionError => 502,
            ErrorCode::InternalError => 500,
        }
    }

    /// Convert to the client-facing envelope with a sanitized message
    pub fn to_error_message(&self) -> ErrorMessage {
        let message = match self {
            PipelineError::Validation { message }
            | PipelineError::ConcurrencyConflict { message }
            | PipelineError::Internal { message } => message.clone(),
            other => other.to_string(),
        };

        ErrorMessage {
            error: ErrorDetails {
                code: self.code(),
                message: sanitize_error_message(&message),
            },
        }
    }

    /// Create validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create not found error
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Create stage execution error
    pub fn stage_execution<S: Into<String>>(stage: AgentType, message: S) -> Self {
        Self::StageExecution {
            stage,
            message: message.into(),
        }
    }

    /// Create timeout error
    pub fn timeout(stage: AgentType, max_duration: Duration) -> Self {
        Self::Timeout {
            stage,
            max_duration,
        }
    }

    /// Create concurrency conflict error
    pub fn concurrency_conflict<S: Into<String>>(message: S) -> Self {
        Self::ConcurrencyConflict {
            message: message.into(),
        }
    }

    /// Create invalid transition error
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::NotFound { .. })
    }
}

/// Redact secrets and sensitive paths, then cap the length
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
