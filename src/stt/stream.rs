//! Streaming transcription over a persistent WebSocket.
//!
//! While capturing, the client pushes `{"type":"audio","data":<base64 PCM16
//! mono 16 kHz>}` frames and sends `{"type":"finalize"}` on end-capture. The
//! server answers with `{"type":"transcript","text",...,"is_final":...}` and
//! `{"type":"error","message":...}` messages.
//!
//! Reconnects after an abnormal close are bounded: fixed backoff between
//! attempts, capped attempt count, and a minimum interval between deliberate
//! connects. Once retries are exhausted the client goes to `Failed` and stays
//! there until the caller re-initiates listening.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{ConnectionState, TranscriptEvent};
use crate::config::SttConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client → server frames.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Audio { data: String },
    Finalize {},
}

/// Server → client frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Transcript {
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    Error {
        message: String,
    },
}

/// What the session driver sees from the streaming transport.
#[derive(Debug)]
pub enum StreamEvent {
    Transcript(TranscriptEvent),
    /// Backend-reported recognition error.
    Error(String),
    /// Socket closed. `clean` when the server sent a normal close frame.
    Closed { clean: bool },
}

/// Bounded-retry reconnect schedule. Pure bookkeeping so the cap, backoff
/// and throttle rules are testable without a socket.
pub struct ReconnectPolicy {
    backoff: Duration,
    min_interval: Duration,
    max_attempts: u32,
    attempts: u32,
    last_attempt: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn new(backoff: Duration, min_interval: Duration, max_attempts: u32) -> Self {
        Self {
            backoff,
            min_interval,
            max_attempts,
            attempts: 0,
            last_attempt: None,
        }
    }

    /// How long a deliberate connect must still wait to respect the minimum
    /// interval between attempts, if at all.
    pub fn connect_throttle(&self, now: Instant) -> Option<Duration> {
        let last = self.last_attempt?;
        let since = now.duration_since(last);
        (since < self.min_interval).then(|| self.min_interval - since)
    }

    /// Record that a connect attempt is being issued.
    pub fn note_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    /// Backoff before the next retry after an abnormal close, or `None` once
    /// the attempt cap is exhausted.
    pub fn next_retry(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.backoff)
    }

    /// A connection was established; the retry budget refills.
    pub fn connected(&mut self) {
        self.attempts = 0;
    }

    /// Full reset, used when the caller re-initiates listening after failure.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_attempt = None;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Encode one frame of f32 samples as base64 PCM16 LE.
fn pcm16_base64(frame: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for &s in frame {
        let pcm = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&pcm.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Persistent duplex transcription client.
pub struct StreamingStt {
    url: String,
    connect_timeout: Duration,
    state: ConnectionState,
    policy: ReconnectPolicy,
    writer: Option<SplitSink<WsStream, Message>>,
    events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl StreamingStt {
    pub fn new(cfg: &SttConfig) -> Self {
        Self {
            url: cfg.stream_url.clone(),
            connect_timeout: cfg.connect_timeout(),
            state: ConnectionState::Disconnected,
            policy: ReconnectPolicy::new(
                cfg.reconnect_backoff(),
                cfg.reconnect_min_interval(),
                cfg.reconnect_max_attempts,
            ),
            writer: None,
            events: None,
            reader: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connect (caller-initiated). Waits out the minimum interval since the
    /// last attempt first; a timed-out attempt counts as a connection error.
    pub async fn connect(&mut self) -> anyhow::Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        // Re-initiation refills the retry budget; the minimum interval
        // since the last attempt still applies.
        self.policy.connected();
        if let Some(wait) = self.policy.connect_throttle(Instant::now()) {
            debug!(?wait, "Throttling connect attempt");
            tokio::time::sleep(wait).await;
        }
        self.try_connect().await
    }

    /// One connect attempt with timeout. Updates state on both outcomes.
    async fn try_connect(&mut self) -> anyhow::Result<()> {
        self.teardown_socket();
        self.state = ConnectionState::Connecting;
        self.policy.note_attempt(Instant::now());
        info!(url = %self.url, "Connecting to transcription server");

        let url = self.url.clone();
        let connected = tokio::time::timeout(self.connect_timeout, connect_async(url)).await;
        let ws = match connected {
            Ok(Ok((ws, _resp))) => ws,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                anyhow::bail!("Transcription connect failed: {e}");
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                anyhow::bail!(
                    "Transcription connect timed out after {:?}",
                    self.connect_timeout
                );
            }
        };

        let (writer, read) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        self.reader = Some(tokio::spawn(read_socket(read, tx)));
        self.writer = Some(writer);
        self.events = Some(rx);
        self.state = ConnectionState::Connected;
        self.policy.connected();
        info!("Transcription server connected");
        Ok(())
    }

    /// Recover from an abnormal close while listening: fixed backoff between
    /// attempts, bounded count, then a terminal error. The caller stops
    /// auto-reconnecting after the error until listening is re-initiated.
    pub async fn reconnect(&mut self) -> anyhow::Result<()> {
        loop {
            let Some(wait) = self.policy.next_retry() else {
                self.state = ConnectionState::Failed;
                anyhow::bail!("Transcription server unavailable");
            };
            self.state = ConnectionState::ReconnectPending;
            warn!(
                attempt = self.policy.attempts(),
                ?wait,
                "Reconnecting to transcription server"
            );
            tokio::time::sleep(wait).await;
            match self.try_connect().await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Reconnect attempt failed: {e}"),
            }
        }
    }

    /// Push one frame of captured audio.
    pub async fn send_audio(&mut self, frame: &[f32]) -> anyhow::Result<()> {
        let json = serde_json::to_string(&ClientFrame::Audio {
            data: pcm16_base64(frame),
        })?;
        self.send(json).await
    }

    /// Ask the backend to settle the current utterance.
    pub async fn finalize(&mut self) -> anyhow::Result<()> {
        let json = serde_json::to_string(&ClientFrame::Finalize {})?;
        self.send(json).await
    }

    async fn send(&mut self, json: String) -> anyhow::Result<()> {
        let result = match self.writer.as_mut() {
            Some(writer) => writer.send(Message::Text(json)).await,
            None => anyhow::bail!("Transcription socket not connected"),
        };
        if let Err(e) = result {
            self.state = ConnectionState::Disconnected;
            anyhow::bail!("Transcription send failed: {e}");
        }
        Ok(())
    }

    /// Non-blocking poll for the next transport event.
    pub fn try_next_event(&mut self) -> Option<StreamEvent> {
        let rx = self.events.as_mut()?;
        match rx.try_recv() {
            Ok(ev) => {
                if matches!(ev, StreamEvent::Closed { .. }) {
                    self.state = ConnectionState::Disconnected;
                    self.writer = None;
                }
                Some(ev)
            }
            Err(_) => None,
        }
    }

    /// Next transport event, or `None` if no connection was ever made.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        match self.events.as_mut() {
            Some(rx) => {
                let ev = rx.recv().await;
                if matches!(ev, Some(StreamEvent::Closed { .. }) | None) {
                    self.state = ConnectionState::Disconnected;
                    self.writer = None;
                }
                ev
            }
            None => None,
        }
    }

    /// Deliberate teardown (stop-listening). Not an error path, so the
    /// policy is reset for the next session.
    pub fn disconnect(&mut self) {
        self.teardown_socket();
        self.state = ConnectionState::Disconnected;
        self.policy.reset();
    }

    fn teardown_socket(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer = None;
        self.events = None;
    }
}

/// Forward server frames into the event channel until the socket goes away.
async fn read_socket(mut read: SplitStream<WsStream>, tx: mpsc::UnboundedSender<StreamEvent>) {
    let mut clean = false;
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                Ok(ServerFrame::Transcript { text, is_final }) => {
                    let _ = tx.send(StreamEvent::Transcript(TranscriptEvent {
                        text,
                        is_final,
                        utterance: None,
                    }));
                }
                Ok(ServerFrame::Error { message }) => {
                    let _ = tx.send(StreamEvent::Error(message));
                }
                Err(e) => debug!("Ignoring unrecognized server frame: {e}"),
            },
            Ok(Message::Close(frame)) => {
                clean = frame
                    .map(|f| f.code == CloseCode::Normal)
                    .unwrap_or(false);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Transcription socket error: {e}");
                break;
            }
        }
    }
    let _ = tx.send(StreamEvent::Closed { clean });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_base64_round_trip() {
        let frame = [0.0f32, 0.5, -0.5, 1.0, -1.0];
        let encoded = pcm16_base64(&frame);
        let bytes = BASE64.decode(encoded).unwrap();
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples[0], 0);
        assert_eq!(samples[1], 16383);
        assert_eq!(samples[2], -16383);
        assert_eq!(samples[3], 32767);
        assert_eq!(samples[4], -32767);
    }

    #[test]
    fn test_client_frame_wire_shape() {
        let audio = serde_json::to_value(ClientFrame::Audio {
            data: "AAAA".into(),
        })
        .unwrap();
        assert_eq!(audio["type"], "audio");
        assert_eq!(audio["data"], "AAAA");

        let fin = serde_json::to_value(ClientFrame::Finalize {}).unwrap();
        assert_eq!(fin["type"], "finalize");
    }

    #[test]
    fn test_server_frame_parsing() {
        let t: ServerFrame =
            serde_json::from_str(r#"{"type":"transcript","text":"hello","is_final":true}"#)
                .unwrap();
        match t {
            ServerFrame::Transcript { text, is_final } => {
                assert_eq!(text, "hello");
                assert!(is_final);
            }
            _ => panic!("expected transcript"),
        }

        // is_final defaults to false for interim events
        let t: ServerFrame =
            serde_json::from_str(r#"{"type":"transcript","text":"hel"}"#).unwrap();
        match t {
            ServerFrame::Transcript { is_final, .. } => assert!(!is_final),
            _ => panic!("expected transcript"),
        }

        let e: ServerFrame =
            serde_json::from_str(r#"{"type":"error","message":"boom"}"#).unwrap();
        match e {
            ServerFrame::Error { message } => assert_eq!(message, "boom"),
            _ => panic!("expected error"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_bounded_retries_then_exhaustion() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_secs(2), Duration::from_secs(2), 5);
        for attempt in 1..=5 {
            let wait = policy.next_retry().expect("retry within cap");
            assert_eq!(wait, Duration::from_secs(2));
            assert_eq!(policy.attempts(), attempt);
        }
        assert!(policy.next_retry().is_none());
        // Still exhausted until a reset or successful connection
        assert!(policy.next_retry().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_refills_after_connection() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_secs(2), Duration::from_secs(2), 5);
        for _ in 0..5 {
            policy.next_retry();
        }
        assert!(policy.next_retry().is_none());
        policy.connected();
        assert!(policy.next_retry().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_connect_throttle() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_secs(2), Duration::from_secs(2), 5);
        let start = Instant::now();
        // No previous attempt: no throttle
        assert!(policy.connect_throttle(start).is_none());

        policy.note_attempt(start);
        let wait = policy.connect_throttle(start + Duration::from_millis(500));
        assert_eq!(wait, Some(Duration::from_millis(1500)));

        // Past the minimum interval: free to connect
        assert!(policy
            .connect_throttle(start + Duration::from_secs(3))
            .is_none());
    }
}
