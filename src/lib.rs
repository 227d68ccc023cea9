//! Streaming client for Tencent Cloud real-time speech recognition.
//!
//! The crate covers the full client lifecycle:
//!
//! - [`signing`]: authenticated WebSocket URLs via query-string HMAC-SHA1 or
//!   TC3-HMAC-SHA256, both over one canonical parameter table.
//! - [`session`]: the per-connection state machine and its socket driver,
//!   from handshake through streaming to graceful close.
//! - [`reconnect`]: bounded-retry reconnection and the [`Recognizer`] entry
//!   point.
//! - [`audio`]: the PCM16 mono 16 kHz frame type and capture-release hook.
//!
//! ```no_run
//! use tencent_asr::{
//!     AudioFrame, Credentials, RecognitionCallbacks, Recognizer, RecognizerConfig,
//! };
//!
//! # async fn demo() -> Result<(), tencent_asr::AsrError> {
//! let config = RecognizerConfig::new(Credentials::new("secret-id", "secret-key", "app-id"));
//! let recognizer = Recognizer::new(config)?;
//!
//! let callbacks = RecognitionCallbacks::new()
//!     .on_interim(|text| println!("… {text}"))
//!     .on_final(|text| println!("=> {text}"));
//! let handle = recognizer.start(callbacks, None);
//!
//! handle.feed_audio(AudioFrame::from_f32_samples(&[0.0; 320]));
//! handle.stop();
//! let outcome = handle.join().await;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod error;
pub mod reconnect;
pub mod session;
pub mod signing;

// Re-export the surface most callers need.
pub use audio::{AudioFrame, CaptureGuard};
pub use error::AsrError;
pub use reconnect::{Recognizer, RecognizerConfig, RetryDecision, RetryPolicy, SessionHandle};
pub use session::{RecognitionCallbacks, SessionOutcome, SessionTimeouts};
pub use signing::params::SessionParams;
pub use signing::{Credentials, Endpoint, SigningScheme};
