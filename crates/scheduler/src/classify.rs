use serde::Serialize;

use crate::error::SyncError;

/// Lower-case message fragments that mark a failure as permanent.
pub const PERMANENT_PATTERNS: [&str; 6] = [
    "no saved credentials",
    "certificate not found",
    "no accounts found",
    "unsupported institution",
    "invalid credentials",
    "vision provider not configured",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Never retried; the intent is skipped.
    Permanent,
    /// Retried while the budget lasts.
    Transient,
    /// Hard wall-clock budget exceeded; retried like a transient error.
    Timeout,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

pub fn is_permanent_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    PERMANENT_PATTERNS.iter().any(|p| lower.contains(p))
}

pub fn classify(error: &SyncError) -> ErrorClass {
    if matches!(error, SyncError::Timeout(_)) {
        return ErrorClass::Timeout;
    }
    if is_permanent_message(&error.to_string()) {
        ErrorClass::Permanent
    } else {
        ErrorClass::Transient
    }
}
