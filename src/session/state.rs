//! Pure session state machine.
//!
//! [`Session::apply`] maps `(current state, event)` to a new state plus a
//! list of [`Effect`]s for the driver to execute. The machine performs no
//! I/O and holds no timers, so every lifecycle rule (including the race
//! between a final transcript and the no-result timer) is testable without
//! a socket. Timer expiries arrive as ordinary events; an expiry that lost
//! the race against a state change is a no-op because the guard on the
//! current state no longer matches.

use crate::error::AsrError;

// ============================================================
// States and events
// ============================================================

/// Lifecycle phase of one recognition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// TCP/WebSocket dial in progress.
    Connecting,
    /// Transport is up, waiting for the service acknowledgement.
    Handshaking,
    /// Audio flows out, transcripts flow in.
    Streaming,
    /// Stop signal sent, draining remaining frames until close or grace
    /// expiry.
    Finalizing,
    /// Terminal, ended without a terminal failure.
    Closed,
    /// Terminal, ended with a failure recorded.
    Errored,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }
}

/// Everything that can happen to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The driver started a connection attempt.
    DialStarted,
    /// The WebSocket upgrade completed.
    TransportOpened,
    /// First successful frame from the service.
    HandshakeAck { voice_id: String },
    /// A partial transcript (`final: 0`).
    Interim { text: String },
    /// The last transcript of the utterance (`final: 1`).
    Final { text: String },
    /// A frame with a nonzero service code.
    ServiceError { code: i64, message: String },
    /// A frame that could not be parsed.
    ProtocolFault { detail: String },
    /// The caller asked to stop.
    StopRequested,
    /// The handshake timer expired.
    HandshakeTimeout,
    /// The no-result timer expired.
    NoResultTimeout,
    /// The finalize grace timer expired.
    GraceExpired,
    /// The transport went away. `clean` means the peer closed with a normal
    /// close frame (or none at all).
    TransportClosed { clean: bool },
}

/// Side effects the driver must execute after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ArmHandshakeTimer,
    CancelHandshakeTimer,
    ArmNoResultTimer,
    CancelNoResultTimer,
    ArmGraceTimer,
    EmitInterim(String),
    EmitFinal(String),
    SendStopSignal,
    CloseTransport,
}

// ============================================================
// Session
// ============================================================

/// Accumulated state of one session.
#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
    voice_id: Option<String>,
    /// Text recognized by earlier connection attempts over the same
    /// utterance, prepended to whatever this attempt delivers.
    carried: String,
    interim_text: String,
    final_text: String,
    delivered: bool,
    manually_stopped: bool,
    failure: Option<AsrError>,
}

/// What one finished session amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// The final transcript, if one was delivered to the caller.
    pub transcript: Option<String>,
    /// Undelivered text accumulated when the session ended, for a
    /// reconnect attempt to carry forward.
    pub pending: Option<String>,
    /// The voice id echoed by the service, for log correlation.
    pub voice_id: Option<String>,
    /// Whether the caller requested the stop.
    pub manually_stopped: bool,
    /// The terminal failure, if any. The reconnection policy consults
    /// [`AsrError::is_retryable`] on this.
    pub failure: Option<AsrError>,
}

impl SessionOutcome {
    /// An outcome for a session that failed before it could even dial.
    pub fn failed(failure: AsrError) -> Self {
        Self {
            transcript: None,
            pending: None,
            voice_id: None,
            manually_stopped: false,
            failure: Some(failure),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session resuming the utterance of a dropped predecessor, keeping
    /// the text it had already recognized.
    pub fn resume(carry: Option<String>) -> Self {
        Self {
            carried: carry.unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn voice_id(&self) -> Option<&str> {
        self.voice_id.as_deref()
    }

    /// Apply one event, returning the effects the driver must run.
    ///
    /// Terminal states absorb every event.
    pub fn apply(&mut self, event: SessionEvent) -> Vec<Effect> {
        use Effect::*;
        use SessionEvent as E;
        use SessionState as S;

        if self.state.is_terminal() {
            return Vec::new();
        }

        match event {
            E::DialStarted => match self.state {
                S::Idle => {
                    self.state = S::Connecting;
                    vec![ArmHandshakeTimer]
                }
                _ => Vec::new(),
            },

            E::TransportOpened => match self.state {
                S::Connecting => {
                    self.state = S::Handshaking;
                    Vec::new()
                }
                _ => Vec::new(),
            },

            E::HandshakeAck { voice_id } => match self.state {
                S::Handshaking => {
                    if !voice_id.is_empty() {
                        self.voice_id = Some(voice_id);
                    }
                    self.state = S::Streaming;
                    vec![CancelHandshakeTimer, ArmNoResultTimer]
                }
                _ => Vec::new(),
            },

            E::Interim { text } => match self.state {
                // A transcript while still handshaking doubles as the ack.
                S::Handshaking | S::Streaming => {
                    self.state = S::Streaming;
                    self.interim_text = text.clone();
                    vec![CancelHandshakeTimer, ArmNoResultTimer, EmitInterim(text)]
                }
                _ => Vec::new(),
            },

            E::Final { text } => match self.state {
                S::Handshaking | S::Streaming => {
                    let mut effects = vec![CancelHandshakeTimer, CancelNoResultTimer];
                    // An empty final marker promotes whatever text
                    // accumulated; with nothing at all the session counts as
                    // silent.
                    let text = if text.is_empty() {
                        self.accumulated()
                    } else {
                        let mut full = std::mem::take(&mut self.carried);
                        full.push_str(&text);
                        full
                    };
                    if text.is_empty() {
                        self.failure = Some(AsrError::NoSpeechDetected);
                    } else {
                        self.final_text = text.clone();
                        self.delivered = true;
                        effects.push(EmitFinal(text));
                    }
                    effects.push(SendStopSignal);
                    effects.push(ArmGraceTimer);
                    self.state = S::Finalizing;
                    effects
                }
                _ => Vec::new(),
            },

            E::ServiceError { code, message } => self.fail(AsrError::from_service_code(code, message)),

            E::ProtocolFault { detail } => self.fail(AsrError::Protocol(detail)),

            E::StopRequested => {
                self.manually_stopped = true;
                match self.state {
                    S::Idle => {
                        self.state = S::Closed;
                        Vec::new()
                    }
                    S::Connecting | S::Handshaking => {
                        self.state = S::Closed;
                        vec![CancelHandshakeTimer, CloseTransport]
                    }
                    S::Streaming => {
                        self.state = S::Finalizing;
                        vec![CancelNoResultTimer, SendStopSignal, ArmGraceTimer]
                    }
                    // Already winding down.
                    S::Finalizing | S::Closed | S::Errored => Vec::new(),
                }
            }

            E::HandshakeTimeout => match self.state {
                S::Connecting | S::Handshaking => self.fail(AsrError::Transport(
                    "timed out waiting for the service handshake".into(),
                )),
                _ => Vec::new(),
            },

            E::NoResultTimeout => match self.state {
                S::Streaming => {
                    let text = self.accumulated();
                    if text.is_empty() {
                        self.fail(AsrError::NoSpeechDetected)
                    } else {
                        // The service went quiet after partial results; keep
                        // what it gave us.
                        self.final_text = text.clone();
                        self.delivered = true;
                        self.state = S::Finalizing;
                        vec![EmitFinal(text), SendStopSignal, ArmGraceTimer]
                    }
                }
                _ => Vec::new(),
            },

            E::GraceExpired => match self.state {
                S::Finalizing => {
                    let mut effects = Vec::new();
                    if let Some(text) = self.deliver_pending() {
                        effects.push(EmitFinal(text));
                    }
                    effects.push(CloseTransport);
                    self.state = S::Closed;
                    effects
                }
                _ => Vec::new(),
            },

            E::TransportClosed { clean } => match self.state {
                S::Finalizing => {
                    let mut effects = Vec::new();
                    if let Some(text) = self.deliver_pending() {
                        effects.push(EmitFinal(text));
                    }
                    self.state = S::Closed;
                    effects
                }
                S::Streaming if clean => {
                    if let Some(text) = self.deliver_pending() {
                        self.state = S::Closed;
                        vec![CancelNoResultTimer, EmitFinal(text)]
                    } else {
                        self.failure = Some(AsrError::NoSpeechDetected);
                        self.state = S::Errored;
                        vec![CancelNoResultTimer]
                    }
                }
                _ => {
                    self.failure = Some(AsrError::Transport(
                        "connection closed unexpectedly".into(),
                    ));
                    self.state = S::Errored;
                    vec![CancelHandshakeTimer, CancelNoResultTimer]
                }
            },
        }
    }

    /// Record a terminal failure and tear down.
    fn fail(&mut self, failure: AsrError) -> Vec<Effect> {
        self.failure = Some(failure);
        self.state = SessionState::Errored;
        vec![
            Effect::CancelHandshakeTimer,
            Effect::CancelNoResultTimer,
            Effect::CloseTransport,
        ]
    }

    /// Carried text plus the freshest interim of this attempt.
    fn accumulated(&mut self) -> String {
        let mut text = std::mem::take(&mut self.carried);
        text.push_str(&std::mem::take(&mut self.interim_text));
        text
    }

    /// Deliver the best undelivered transcript, promoting accumulated text
    /// when no final arrived. Delivers at most once per session.
    fn deliver_pending(&mut self) -> Option<String> {
        if self.delivered {
            return None;
        }
        let text = if self.final_text.is_empty() {
            self.accumulated()
        } else {
            self.final_text.clone()
        };
        if text.is_empty() {
            return None;
        }
        self.final_text = text.clone();
        self.delivered = true;
        Some(text)
    }

    pub fn into_outcome(self) -> SessionOutcome {
        let Session {
            voice_id,
            carried,
            interim_text,
            final_text,
            delivered,
            manually_stopped,
            failure,
            ..
        } = self;
        let pending = if delivered {
            None
        } else {
            let mut text = carried;
            text.push_str(&interim_text);
            (!text.is_empty()).then_some(text)
        };
        SessionOutcome {
            transcript: delivered.then_some(final_text),
            pending,
            voice_id,
            manually_stopped,
            failure,
        }
    }
}
