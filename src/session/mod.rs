//! Streaming recognition session.
//!
//! A session is one WebSocket conversation with the recognition service:
//! connect with a signed URL, wait for the handshake acknowledgement, stream
//! audio while transcripts come back, then wind down gracefully. The
//! lifecycle logic lives in a pure state machine ([`state::Session`]) that
//! maps `(state, event)` to a list of side effects; [`manager::run_session`]
//! owns the socket and timers and interprets those effects.

pub mod manager;
pub mod messages;
pub mod state;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AsrError;

pub use manager::{SessionContext, run_session};
pub use state::{Session, SessionEvent, SessionOutcome, SessionState};

// ============================================================
// Timeouts
// ============================================================

/// Timer durations governing one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTimeouts {
    /// Budget for establishing the connection and receiving the handshake
    /// acknowledgement, measured from the start of the dial.
    pub handshake: Duration,
    /// Maximum silence between recognition results once streaming.
    pub no_result: Duration,
    /// How long to wait for the server close after the stop signal before
    /// tearing the transport down locally.
    pub finalize_grace: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            no_result: Duration::from_secs(30),
            finalize_grace: Duration::from_secs(1),
        }
    }
}

// ============================================================
// Callbacks
// ============================================================

type TextHook = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&AsrError) + Send + Sync>;
type CloseHook = Arc<dyn Fn() + Send + Sync>;

/// Caller hooks invoked as the session progresses.
///
/// All hooks are optional. `on_interim` may fire many times, `on_final` at
/// most once per session, `on_error` at most once and only for terminal
/// failures, and `on_closed` exactly once when the session (including any
/// reconnect attempts) is over.
#[derive(Clone, Default)]
pub struct RecognitionCallbacks {
    on_interim: Option<TextHook>,
    on_final: Option<TextHook>,
    on_error: Option<ErrorHook>,
    on_closed: Option<CloseHook>,
}

impl RecognitionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_interim(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_interim = Some(Arc::new(hook));
        self
    }

    pub fn on_final(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_final = Some(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&AsrError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn on_closed(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_closed = Some(Arc::new(hook));
        self
    }

    pub(crate) fn notify_interim(&self, text: &str) {
        if let Some(hook) = &self.on_interim {
            hook(text);
        }
    }

    pub(crate) fn notify_final(&self, text: &str) {
        if let Some(hook) = &self.on_final {
            hook(text);
        }
    }

    pub(crate) fn notify_error(&self, error: &AsrError) {
        if let Some(hook) = &self.on_error {
            hook(error);
        }
    }

    pub(crate) fn notify_closed(&self) {
        if let Some(hook) = &self.on_closed {
            hook();
        }
    }
}

impl fmt::Debug for RecognitionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionCallbacks")
            .field("on_interim", &self.on_interim.is_some())
            .field("on_final", &self.on_final.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_closed", &self.on_closed.is_some())
            .finish()
    }
}
