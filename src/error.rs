//! Error taxonomy for the streaming recognition client.
//!
//! Every failure the crate can surface is one of the [`AsrError`] variants
//! below. The split matters operationally: [`AsrError::is_retryable`] is the
//! single source of truth the reconnection layer consults, and
//! [`AsrError::remediation`] maps each classification to one human-readable
//! hint so callers can show actionable text without matching on variants
//! themselves.

use thiserror::Error;

/// Service error codes that must never be retried.
///
/// - `4001`: request parameters rejected (usually a malformed signature)
/// - `4002`: authentication failed (bad SecretId/SecretKey pair)
/// - `4003`: real-time recognition not enabled for this AppID
/// - `4004`: recognition quota exhausted
pub const FATAL_SERVICE_CODES: [i64; 4] = [4001, 4002, 4003, 4004];

/// Errors produced by the signer, session manager and reconnection policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AsrError {
    /// Missing or invalid credentials/parameters. Surfaced synchronously,
    /// never retried.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The audio capture device could not be acquired or was revoked.
    /// Requires user action, never retried automatically.
    #[error("audio capture unavailable: {0}")]
    Permission(String),

    /// Connection drop, connect failure or timeout. Retryable.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Malformed or unexpected message from the service. Retryable; a
    /// repeating protocol fault exhausts the retry budget like any other.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A service error code from [`FATAL_SERVICE_CODES`]. Terminates the
    /// session immediately without consuming a retry attempt.
    #[error("recognition service rejected the session (code {code}): {message}")]
    ServiceFatal { code: i64, message: String },

    /// Any other nonzero service code. Treated as transient and retried.
    #[error("recognition service reported a transient fault (code {code}): {message}")]
    ServiceRecoverable { code: i64, message: String },

    /// The session ended without ever producing a transcript. A distinct
    /// terminal outcome, never delivered to callers as an empty string.
    #[error("no speech detected before the session ended")]
    NoSpeechDetected,

    /// The reconnection policy exhausted its retry budget.
    #[error("giving up after {attempts} reconnect attempts: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },
}

impl AsrError {
    /// Build a classified error from a nonzero service error code.
    pub fn from_service_code(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        if FATAL_SERVICE_CODES.contains(&code) {
            AsrError::ServiceFatal { code, message }
        } else {
            AsrError::ServiceRecoverable { code, message }
        }
    }

    /// Whether the reconnection policy may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AsrError::Transport(_) | AsrError::Protocol(_) | AsrError::ServiceRecoverable { .. }
        )
    }

    /// One actionable remediation hint per classification.
    pub fn remediation(&self) -> &'static str {
        match self {
            AsrError::Configuration(_) => {
                "check that the SecretId, SecretKey and AppID are all configured"
            }
            AsrError::Permission(_) => {
                "check microphone permissions and close other applications using the device"
            }
            AsrError::Transport(_) | AsrError::ConnectionExhausted { .. } => {
                "check the network connection and service availability, then retry"
            }
            AsrError::Protocol(_) => "retry; report the issue if it keeps happening",
            AsrError::ServiceFatal { code, .. } => match code {
                4001 | 4002 => "verify the SecretId/SecretKey pair and the request signature",
                4003 => "enable real-time speech recognition for this AppID in the console",
                4004 => "purchase additional recognition quota or enable pay-as-you-go billing",
                _ => "check the service account configuration",
            },
            AsrError::ServiceRecoverable { .. } => "wait a moment and retry",
            AsrError::NoSpeechDetected => {
                "speak clearly near the microphone and check its input level"
            }
        }
    }
}
