//! Speech-to-text transport clients.
//!
//! Two transport shapes behind one adapter enum:
//! - **Batch** ([`batch::BatchStt`]): upload one finalized utterance as WAV,
//!   get one transcript back.
//! - **Streaming** ([`stream::StreamingStt`]): persistent WebSocket fed raw
//!   PCM16 frames while capturing, delivering interim and final transcripts.

pub mod batch;
pub mod stream;

use serde::Serialize;
use uuid::Uuid;

use crate::config::SttConfig;

/// A piece of recognized text from the transcription backend.
///
/// Within one utterance, zero or more interim events precede exactly one
/// final event (or none at all if the utterance is discarded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    /// Source utterance, when known. Streaming-transport events that arrive
    /// before utterance bookkeeping carry `None`.
    pub utterance: Option<Uuid>,
}

/// Connection lifecycle of a persistent transport. Private to its client;
/// exposed read-only for the connectivity indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectPending,
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::ReconnectPending => write!(f, "reconnect_pending"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Enum dispatch over the two transports.
///
/// Avoids dyn-compatibility issues with async methods; the session driver
/// matches on the variant because the two shapes drive the capture loop
/// differently (frames-as-you-go vs whole utterance at the end).
pub enum SttAdapter {
    Batch(batch::BatchStt),
    Stream(stream::StreamingStt),
}

/// Create the configured transcription client.
///
/// `adapter` is "stream" or "batch".
pub fn create_stt_adapter(cfg: &SttConfig) -> anyhow::Result<SttAdapter> {
    match cfg.adapter.as_str() {
        "stream" => Ok(SttAdapter::Stream(stream::StreamingStt::new(cfg))),
        "batch" => Ok(SttAdapter::Batch(batch::BatchStt::new(cfg)?)),
        other => anyhow::bail!("Unknown STT adapter: {}", other),
    }
}
