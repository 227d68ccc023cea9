//! Wire messages exchanged with the recognition service.
//!
//! Every server frame is a JSON text message. `code` is `0` on success and a
//! service error code otherwise; the first successful frame of a session
//! carries no `result` and acts as the handshake acknowledgement. Transcript
//! frames carry `result.voice_text_str`, with a top-level `final: 1` marking
//! the last transcript of the utterance.

use serde::Deserialize;

use crate::error::AsrError;
use crate::session::state::SessionEvent;

/// One frame from the recognition service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerMessage {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub result: Option<RecognitionPayload>,
    #[serde(rename = "final", default)]
    pub is_final: Option<u8>,
}

/// The recognition body of a transcript frame.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionPayload {
    #[serde(default)]
    pub voice_text_str: String,
    #[serde(default)]
    pub slice_type: Option<u8>,
}

impl ServerMessage {
    /// Parse a raw text frame.
    pub fn parse(raw: &str) -> Result<Self, AsrError> {
        serde_json::from_str(raw)
            .map_err(|err| AsrError::Protocol(format!("unparseable service message: {err}")))
    }

    /// Classify the frame as a session event.
    pub fn into_event(self) -> SessionEvent {
        if self.code != 0 {
            return SessionEvent::ServiceError {
                code: self.code,
                message: self.message.unwrap_or_default(),
            };
        }
        match (self.is_final, self.result) {
            (Some(1), result) => SessionEvent::Final {
                text: result.map(|r| r.voice_text_str).unwrap_or_default(),
            },
            (_, Some(result)) => SessionEvent::Interim {
                text: result.voice_text_str,
            },
            _ => SessionEvent::HandshakeAck {
                voice_id: self.voice_id.unwrap_or_default(),
            },
        }
    }
}

/// The text frame that asks the service to finish the utterance and close.
pub fn stop_signal() -> String {
    serde_json::json!({"type": "end"}).to_string()
}
