//! Session driver.
//!
//! [`run_session`] performs one connection attempt end to end: sign the URL,
//! dial, then loop over socket frames, outgoing audio, timers and the
//! cancellation token, feeding everything into the pure state machine and
//! executing the effects it returns. The `select!` is biased so socket
//! frames are always drained before timer expiries; a final transcript that
//! arrives in the same poll as a timeout therefore wins the race.

use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audio::AudioFrame;
use crate::error::AsrError;
use crate::session::messages::{self, ServerMessage};
use crate::session::state::{Effect, Session, SessionEvent, SessionOutcome, SessionState};
use crate::session::{RecognitionCallbacks, SessionTimeouts};
use crate::signing::params::SessionParams;
use crate::signing::{Credentials, Endpoint, SigningScheme, signed_url};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Shared slot through which the driver publishes the session voice id.
pub type VoiceIdSlot = Arc<Mutex<Option<String>>>;

/// Everything one connection attempt needs.
pub struct SessionContext<'a> {
    pub credentials: &'a Credentials,
    pub endpoint: &'a Endpoint,
    pub scheme: SigningScheme,
    pub params: &'a SessionParams,
    pub timeouts: SessionTimeouts,
    pub callbacks: &'a RecognitionCallbacks,
    pub voice_id_slot: Option<VoiceIdSlot>,
    /// Text recognized by earlier attempts over the same utterance, kept
    /// by this attempt and prepended to whatever it delivers.
    pub resume_text: Option<String>,
}

#[derive(Default)]
struct Timers {
    handshake: Option<Instant>,
    no_result: Option<Instant>,
    grace: Option<Instant>,
}

impl Timers {
    // Disabled select branches still evaluate their sleep expression, so
    // absent deadlines map to one far in the future.
    fn far() -> Instant {
        Instant::now() + Duration::from_secs(86_400)
    }

    fn handshake_or_far(&self) -> Instant {
        self.handshake.unwrap_or_else(Self::far)
    }

    fn no_result_or_far(&self) -> Instant {
        self.no_result.unwrap_or_else(Self::far)
    }

    fn grace_or_far(&self) -> Instant {
        self.grace.unwrap_or_else(Self::far)
    }
}

/// Run one signed connection attempt to completion.
///
/// Each call resolves fresh session parameters (timestamp, nonce, voice id)
/// and signs a new URL, so a retried attempt never reuses a stale signature.
pub async fn run_session(
    ctx: &SessionContext<'_>,
    cancel: &CancellationToken,
    audio_rx: &mut mpsc::Receiver<AudioFrame>,
) -> SessionOutcome {
    let resolved = ctx.params.resolve();
    if let Some(slot) = &ctx.voice_id_slot {
        *slot.lock() = Some(resolved.voice_id().to_string());
    }
    let url = match signed_url(ctx.scheme, ctx.credentials, ctx.endpoint, &resolved) {
        Ok(url) => url,
        Err(failure) => {
            let mut outcome = SessionOutcome::failed(failure);
            outcome.pending = ctx.resume_text.clone();
            return outcome;
        }
    };

    let mut session = Session::resume(ctx.resume_text.clone());
    let mut timers = Timers::default();
    for effect in session.apply(SessionEvent::DialStarted) {
        if effect == Effect::ArmHandshakeTimer {
            timers.handshake = Some(Instant::now() + ctx.timeouts.handshake);
        }
    }

    debug!(
        host = %ctx.endpoint.host,
        voice_id = %resolved.voice_id(),
        "dialing recognition service"
    );

    // The handshake timer covers the dial itself, so a stuck TCP connect is
    // bounded by the same budget as a silent server.
    let connect_deadline = timers.handshake_or_far();
    let ws = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            session.apply(SessionEvent::StopRequested);
            return session.into_outcome();
        }
        dialed = timeout_at(connect_deadline, connect_async(url.as_str())) => match dialed {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(err)) => {
                warn!(error = %err, "websocket connect failed");
                session.apply(SessionEvent::TransportClosed { clean: false });
                return session.into_outcome();
            }
            Err(_elapsed) => {
                session.apply(SessionEvent::HandshakeTimeout);
                return session.into_outcome();
            }
        },
    };

    session.apply(SessionEvent::TransportOpened);
    let (mut sink, mut stream) = ws.split();
    let mut audio_open = true;
    let mut stop_seen = false;

    while !session.state().is_terminal() {
        let streaming = session.state() == SessionState::Streaming;
        let effects = tokio::select! {
            biased;
            _ = cancel.cancelled(), if !stop_seen => {
                stop_seen = true;
                session.apply(SessionEvent::StopRequested)
            }
            incoming = stream.next() => on_socket(&mut session, incoming),
            _ = sleep_until(timers.handshake_or_far()), if timers.handshake.is_some() => {
                session.apply(SessionEvent::HandshakeTimeout)
            }
            _ = sleep_until(timers.no_result_or_far()), if timers.no_result.is_some() => {
                session.apply(SessionEvent::NoResultTimeout)
            }
            _ = sleep_until(timers.grace_or_far()), if timers.grace.is_some() => {
                session.apply(SessionEvent::GraceExpired)
            }
            frame = audio_rx.recv(), if audio_open && streaming => match frame {
                Some(frame) => {
                    match sink.send(Message::Binary(frame.into_bytes())).await {
                        Ok(()) => Vec::new(),
                        Err(err) => {
                            warn!(error = %err, "audio send failed");
                            session.apply(SessionEvent::TransportClosed { clean: false })
                        }
                    }
                }
                None => {
                    // The caller dropped its sender; the session stays open
                    // until a stop or a final transcript.
                    audio_open = false;
                    Vec::new()
                }
            },
        };

        for effect in effects {
            run_effect(effect, ctx, &mut timers, &mut sink).await;
        }
        publish_voice_id(ctx, &session);
    }

    session.into_outcome()
}

/// Translate one socket poll result into state machine effects.
fn on_socket(
    session: &mut Session,
    incoming: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
) -> Vec<Effect> {
    match incoming {
        Some(Ok(Message::Text(raw))) => match ServerMessage::parse(raw.as_str()) {
            Ok(message) => session.apply(message.into_event()),
            Err(AsrError::Protocol(detail)) => {
                session.apply(SessionEvent::ProtocolFault { detail })
            }
            Err(other) => session.apply(SessionEvent::ProtocolFault {
                detail: other.to_string(),
            }),
        },
        Some(Ok(Message::Close(frame))) => {
            let clean = frame
                .map(|f| matches!(f.code, CloseCode::Normal | CloseCode::Away))
                .unwrap_or(true);
            session.apply(SessionEvent::TransportClosed { clean })
        }
        // Pings are answered by the protocol layer; binary frames from the
        // server carry no session meaning.
        Some(Ok(_)) => Vec::new(),
        Some(Err(err)) => {
            warn!(error = %err, "websocket stream error");
            session.apply(SessionEvent::TransportClosed { clean: false })
        }
        None => session.apply(SessionEvent::TransportClosed { clean: false }),
    }
}

async fn run_effect(
    effect: Effect,
    ctx: &SessionContext<'_>,
    timers: &mut Timers,
    sink: &mut WsSink,
) {
    match effect {
        Effect::ArmHandshakeTimer => {
            timers.handshake = Some(Instant::now() + ctx.timeouts.handshake);
        }
        Effect::CancelHandshakeTimer => timers.handshake = None,
        Effect::ArmNoResultTimer => {
            timers.no_result = Some(Instant::now() + ctx.timeouts.no_result);
        }
        Effect::CancelNoResultTimer => timers.no_result = None,
        Effect::ArmGraceTimer => {
            timers.grace = Some(Instant::now() + ctx.timeouts.finalize_grace);
        }
        Effect::EmitInterim(text) => ctx.callbacks.notify_interim(&text),
        Effect::EmitFinal(text) => ctx.callbacks.notify_final(&text),
        Effect::SendStopSignal => {
            // Failures here are moot, the session is already winding down.
            let _ = sink
                .send(Message::Text(messages::stop_signal().into()))
                .await;
        }
        Effect::CloseTransport => {
            let _ = sink.close().await;
        }
    }
}

fn publish_voice_id(ctx: &SessionContext<'_>, session: &Session) {
    if let (Some(slot), Some(voice_id)) = (&ctx.voice_id_slot, session.voice_id()) {
        let mut slot = slot.lock();
        if slot.as_deref() != Some(voice_id) {
            *slot = Some(voice_id.to_string());
        }
    }
}
