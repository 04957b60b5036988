//! Routing error taxonomy
//!
//! Every fatal routing error maps to a stable [`ErrorCode`] and a sanitized
//! [`Diagnostic`] that is attached to the degraded response. None of these
//! errors is allowed to escape `route` as a panic.

use crate::handler::{HandlerError, HandlerId};
use crate::workflow::Stage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Main error type for routing operations
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Ambiguous match in tier {tier}: {} all match with no precedence entry", format_ids(.candidates))]
    AmbiguousMatch { tier: u8, candidates: Vec<HandlerId> },

    #[error("Invalid handoff target '{target}' requested by {from}")]
    InvalidHandoffTarget { from: HandlerId, target: String },

    #[error("Cyclic handoff: {} -> {repeated}", format_chain(.chain))]
    CyclicHandoff {
        chain: Vec<HandlerId>,
        repeated: HandlerId,
    },

    #[error("Handoff chain length exceeded: {hops} hops, max {max}")]
    ChainLengthExceeded { hops: usize, max: usize },

    #[error("No handler bound for '{handler}'")]
    UnregisteredHandler { handler: HandlerId },

    #[error("Handler error: {0}")]
    HandlerFailed(#[from] HandlerError),

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Unknown session: {0}")]
    UnknownSession(Uuid),
}

/// Stable error codes carried in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AmbiguousMatch,
    InvalidHandoffTarget,
    CyclicHandoff,
    ChainLengthExceeded,
    UnregisteredHandler,
    HandlerFailed,
    InvalidTransition,
    UnknownSession,
}

/// Caller-facing description of a routing failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub message: String,
}

impl RouterError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RouterError::AmbiguousMatch { .. } => ErrorCode::AmbiguousMatch,
            RouterError::InvalidHandoffTarget { .. } => ErrorCode::InvalidHandoffTarget,
            RouterError::CyclicHandoff { .. } => ErrorCode::CyclicHandoff,
            RouterError::ChainLengthExceeded { .. } => ErrorCode::ChainLengthExceeded,
            RouterError::UnregisteredHandler { .. } => ErrorCode::UnregisteredHandler,
            RouterError::HandlerFailed(_) => ErrorCode::HandlerFailed,
            RouterError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            RouterError::UnknownSession(_) => ErrorCode::UnknownSession,
        }
    }

    /// Ambiguity is answered with a clarification request rather than an
    /// abort; everything else stops the current request.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RouterError::AmbiguousMatch { .. })
    }

    /// Convert to a sanitized diagnostic for the caller
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic {
            code: self.code(),
            message: sanitize_diagnostic(&self.to_string()),
        }
    }

    /// Create invalid handoff target error
    pub fn invalid_handoff_target<S: Into<String>>(from: HandlerId, target: S) -> Self {
        Self::InvalidHandoffTarget {
            from,
            target: target.into(),
        }
    }

    /// Create chain length exceeded error
    pub fn chain_length_exceeded(hops: usize, max: usize) -> Self {
        Self::ChainLengthExceeded { hops, max }
    }
}

fn format_ids(ids: &[HandlerId]) -> String {
    ids.iter()
        .map(HandlerId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_chain(ids: &[HandlerId]) -> String {
    ids.iter()
        .map(HandlerId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

const MAX_DIAGNOSTIC_LEN: usize = 500;

/// Redact secrets that may have been echoed from request text and bound
/// the length of the message.
fn sanitize_diagnostic(message: &str) -> String {
    static SECRET_PATTERN: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+")
            .expect("secret pattern is a valid regex")
    });

    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    if sanitized.len() > MAX_DIAGNOSTIC_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_DIAGNOSTIC_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    sanitized
}

/// Result type for routing operations
pub type RouterResult<T> = Result<T, RouterError>;
