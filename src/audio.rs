//! Audio frame model for the streaming session.
//!
//! The recognition service accepts exactly one wire format: 16-bit signed
//! little-endian PCM, mono, 16 kHz. [`AudioFrame`] enforces that format at
//! construction time so the session manager can forward frames as opaque
//! binary without re-validating on the hot path.

use std::time::Duration;

use bytes::Bytes;

use crate::error::AsrError;

/// Required sample rate for outgoing audio.
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Required channel count (mono).
pub const CHANNELS: u16 = 1;

/// Bytes per PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Maximum accepted frame size in bytes (sanity check).
///
/// At 16 kHz mono PCM16, one second of audio is 32 KiB, so 256 KiB allows
/// for ~8 seconds per frame which no sane capture path produces. The bound
/// protects the send queue from buggy callers.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

/// One chunk of PCM16 mono 16 kHz audio, ready to be sent over the socket.
///
/// Backed by [`Bytes`] so handing the frame to the WebSocket sink is
/// zero-copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame(Bytes);

impl AudioFrame {
    /// Wrap raw PCM16LE bytes.
    ///
    /// Fails when the byte count is odd (torn sample) or exceeds
    /// [`MAX_FRAME_BYTES`].
    pub fn from_pcm16(bytes: impl Into<Bytes>) -> Result<Self, AsrError> {
        let bytes = bytes.into();
        if bytes.len() % BYTES_PER_SAMPLE != 0 {
            return Err(AsrError::Configuration(format!(
                "PCM16 frame length {} is not sample-aligned",
                bytes.len()
            )));
        }
        if bytes.len() > MAX_FRAME_BYTES {
            return Err(AsrError::Configuration(format!(
                "audio frame of {} bytes exceeds the {} byte limit",
                bytes.len(),
                MAX_FRAME_BYTES
            )));
        }
        Ok(Self(bytes))
    }

    /// Quantize float samples in `[-1.0, 1.0]` to PCM16.
    ///
    /// Out-of-range samples are clamped. Negative values scale by `0x8000`
    /// and positive ones by `0x7FFF`, matching the asymmetric i16 range.
    pub fn from_f32_samples(samples: &[f32]) -> Self {
        let mut buf = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
        for &sample in samples {
            let s = sample.clamp(-1.0, 1.0);
            let quantized = if s < 0.0 {
                (s * 0x8000 as f32) as i16
            } else {
                (s * 0x7FFF as f32) as i16
            };
            buf.extend_from_slice(&quantized.to_le_bytes());
        }
        Self(Bytes::from(buf))
    }

    /// Raw bytes, as sent on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the frame, yielding its backing buffer.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Number of bytes in the frame.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the frame holds no samples.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Playback duration of the frame at the fixed session format.
    pub fn duration(&self) -> Duration {
        let samples = self.0.len() / BYTES_PER_SAMPLE;
        Duration::from_secs_f64(samples as f64 / SAMPLE_RATE_HZ as f64)
    }
}

/// Hook for releasing an exclusively owned audio capture device.
///
/// The caller acquires the device (and keeps the actual capture machinery
/// outside this crate); the session guarantees `release` is invoked exactly
/// once on every exit path, so device handles never leak across sessions.
pub trait CaptureGuard: Send {
    fn release(&mut self);
}
