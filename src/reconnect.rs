//! Bounded-retry reconnection and the public recognizer surface.
//!
//! A transient failure mid-utterance gets a small, fixed budget of fresh
//! connection attempts with doubling backoff before the failure is surfaced
//! as [`AsrError::ConnectionExhausted`]. Fatal failures (bad credentials,
//! missing quota) and manual stops never consume the budget. Each retry is
//! a brand new session with a freshly signed URL, but text already
//! recognized carries over so a dropped transport never loses the
//! utterance.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audio::{AudioFrame, CaptureGuard};
use crate::error::AsrError;
use crate::session::manager::{SessionContext, VoiceIdSlot, run_session};
use crate::session::state::SessionOutcome;
use crate::session::{RecognitionCallbacks, SessionTimeouts};
use crate::signing::params::SessionParams;
use crate::signing::{Credentials, Endpoint, SigningScheme};

/// Outgoing audio frames buffered while the socket catches up. At 20 ms per
/// frame this holds well under a second of audio; frames beyond it are
/// dropped rather than stalling the capture thread.
const AUDIO_QUEUE_DEPTH: usize = 32;

// ============================================================
// Retry policy
// ============================================================

/// How many times to dial and how long to wait between dials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, the initial dial included.
    pub max_attempts: u32,
    /// Delay before the first retry; each later retry doubles it.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// What the policy says to do after a finished dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Surface the outcome as-is.
    Finish,
    /// The failure was retryable but the budget is spent.
    Exhausted,
    /// Dial again after this delay.
    Retry(Duration),
}

impl RetryPolicy {
    /// Backoff before retry number `retry_index` (zero-based).
    pub fn backoff(&self, retry_index: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(retry_index)
    }

    /// Classify what follows dial number `dial` (one-based).
    pub fn decide(&self, dial: u32, outcome: &SessionOutcome) -> RetryDecision {
        if outcome.manually_stopped {
            return RetryDecision::Finish;
        }
        let retryable = outcome.failure.as_ref().is_some_and(AsrError::is_retryable);
        if !retryable {
            return RetryDecision::Finish;
        }
        if dial >= self.max_attempts {
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry(self.backoff(dial - 1))
    }
}

// ============================================================
// Recognizer
// ============================================================

/// Full configuration for a [`Recognizer`].
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub credentials: Credentials,
    pub endpoint: Endpoint,
    pub scheme: SigningScheme,
    pub params: SessionParams,
    pub timeouts: SessionTimeouts,
    pub retry: RetryPolicy,
}

impl RecognizerConfig {
    /// Defaults for everything but the credentials.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            endpoint: Endpoint::default(),
            scheme: SigningScheme::default(),
            params: SessionParams::default(),
            timeouts: SessionTimeouts::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Entry point for streaming recognition.
///
/// A recognizer owns at most one live session; starting a new one cancels
/// the previous session first, since the capture device is exclusive.
#[derive(Debug)]
pub struct Recognizer {
    config: RecognizerConfig,
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl Recognizer {
    /// Validates the credentials up front so misconfiguration surfaces
    /// before any socket work.
    pub fn new(config: RecognizerConfig) -> Result<Self, AsrError> {
        config.credentials.validate()?;
        Ok(Self {
            config,
            active: Arc::new(Mutex::new(None)),
        })
    }

    /// Start a recognition session on the current tokio runtime.
    ///
    /// `capture` is released exactly once when the session (including any
    /// reconnect attempts) is over, before `on_closed` fires.
    pub fn start(
        &self,
        callbacks: RecognitionCallbacks,
        capture: Option<Box<dyn CaptureGuard>>,
    ) -> SessionHandle {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.active.lock().replace(cancel.clone()) {
            info!("cancelling previous session before starting a new one");
            previous.cancel();
        }

        let (audio_tx, mut audio_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let voice_id: VoiceIdSlot = Arc::new(Mutex::new(None));

        let config = self.config.clone();
        let slot = voice_id.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut capture = capture;
            let mut dial = 0u32;
            let mut carry: Option<String> = None;
            let mut outcome = loop {
                dial += 1;
                if dial > 1 {
                    info!(dial, "starting reconnect attempt");
                }
                let ctx = SessionContext {
                    credentials: &config.credentials,
                    endpoint: &config.endpoint,
                    scheme: config.scheme,
                    params: &config.params,
                    timeouts: config.timeouts,
                    callbacks: &callbacks,
                    voice_id_slot: Some(slot.clone()),
                    resume_text: carry.take(),
                };
                let mut outcome = run_session(&ctx, &task_cancel, &mut audio_rx).await;
                if task_cancel.is_cancelled() {
                    outcome.manually_stopped = true;
                }
                match config.retry.decide(dial, &outcome) {
                    RetryDecision::Finish => break outcome,
                    RetryDecision::Exhausted => {
                        let last_error = outcome
                            .failure
                            .take()
                            .map(|f| f.to_string())
                            .unwrap_or_default();
                        outcome.failure = Some(AsrError::ConnectionExhausted {
                            attempts: dial,
                            last_error,
                        });
                        break outcome;
                    }
                    RetryDecision::Retry(delay) => {
                        carry = outcome.pending.take();
                        debug!(
                            dial,
                            delay_ms = delay.as_millis() as u64,
                            "reconnecting after transient failure"
                        );
                        tokio::select! {
                            _ = task_cancel.cancelled() => {
                                outcome.manually_stopped = true;
                                break outcome;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            };

            // A stop during backoff leaves the carried text outside the
            // outcome; put it back before delivery.
            if outcome.pending.is_none() {
                outcome.pending = carry.take();
            }
            // Text that outlived every transport still reaches the caller.
            if outcome.transcript.is_none() {
                if let Some(text) = outcome.pending.take() {
                    callbacks.notify_final(&text);
                    outcome.transcript = Some(text);
                }
            }
            if let Some(mut guard) = capture.take() {
                guard.release();
            }
            if !outcome.manually_stopped {
                if let Some(failure) = &outcome.failure {
                    callbacks.notify_error(failure);
                }
            }
            callbacks.notify_closed();
            outcome
        });

        SessionHandle {
            audio_tx,
            cancel,
            task,
            voice_id,
        }
    }

    /// Cancel the live session, if any.
    pub fn stop(&self) {
        if let Some(active) = self.active.lock().take() {
            active.cancel();
        }
    }
}

// ============================================================
// Session handle
// ============================================================

/// Caller-side handle to a running session.
#[derive(Debug)]
pub struct SessionHandle {
    audio_tx: mpsc::Sender<AudioFrame>,
    cancel: CancellationToken,
    task: JoinHandle<SessionOutcome>,
    voice_id: VoiceIdSlot,
}

impl SessionHandle {
    /// Queue one audio frame for sending.
    ///
    /// Never blocks: when the queue is full or the session is gone the
    /// frame is dropped, which the service's VAD tolerates far better than
    /// a stalled capture thread.
    pub fn feed_audio(&self, frame: AudioFrame) {
        let _ = self.audio_tx.try_send(frame);
    }

    /// Request a graceful stop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// The voice id of the current connection attempt, once known.
    pub fn voice_id(&self) -> Option<String> {
        self.voice_id.lock().clone()
    }

    /// Whether the session has fully finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to finish and collect its outcome.
    pub async fn join(self) -> SessionOutcome {
        self.task
            .await
            .unwrap_or_else(|err| SessionOutcome::failed(AsrError::Transport(format!(
                "session task failed: {err}"
            ))))
    }
}
