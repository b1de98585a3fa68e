//! The listening session: utterance lifecycle and the driver loop.
//!
//! A session owns the microphone stream, the VAD, and the transcription
//! transport for its whole lifetime. The driver ticks on a fixed cadence,
//! pops frames from the capture ring buffer, feeds them through the VAD and
//! the state machine in [`fsm`], and reports everything the supervisor needs
//! through an event channel. The microphone is released on every exit path
//! because the capture stream lives inside the driver and drops with it.

pub mod fsm;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::{capture_ring_buffer, start_capture, CaptureConsumer, CaptureStream, FRAME_SAMPLES};
use crate::config::AppConfig;
use crate::stt::stream::StreamEvent;
use crate::stt::{create_stt_adapter, SttAdapter};
use crate::vad::VadProcessor;

pub use fsm::{SessionFsm, SessionInput, SessionState};

/// Cadence of the driver loop: frames accumulate in the ring buffer and are
/// drained every tick.
const TICK: Duration = Duration::from_millis(40);

/// How long finalization waits for the backend's final transcript.
const FINAL_TRANSCRIPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceState {
    Capturing,
    Finalized,
    Discarded,
}

/// One bounded span of captured speech.
#[derive(Debug)]
pub struct Utterance {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub samples: Vec<f32>,
    pub state: UtteranceState,
}

impl Utterance {
    fn begin() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            samples: Vec::new(),
            state: UtteranceState::Capturing,
        }
    }

    fn extend(&mut self, frame: &[f32]) {
        debug_assert_eq!(self.state, UtteranceState::Capturing);
        self.samples.extend_from_slice(frame);
    }

    fn finalize(&mut self) {
        self.state = UtteranceState::Finalized;
        self.ended_at = Some(Utc::now());
    }

    fn discard(&mut self) {
        self.state = UtteranceState::Discarded;
        self.samples = Vec::new();
    }
}

/// What the driver reports to the supervisor.
#[derive(Debug)]
pub enum SessionOutput {
    StateChange(SessionState),
    RecordingStart,
    RecordingStop,
    Transcript { text: String, is_final: bool },
    /// A final transcript that passed the script policy; ready for a turn.
    FinalTranscript(String),
    Connectivity { connected: bool },
    Error(String),
    /// The driver exited; the supervisor may join the handle.
    Ended,
}

/// Handle to a running session.
pub struct SessionHandle {
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
    pub join: JoinHandle<()>,
}

impl SessionHandle {
    /// Ask the driver to stop. The caller awaits `join` to guarantee the
    /// microphone teardown finished before starting another session.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

/// Start a listening session.
///
/// `suppress` is the self-trigger gate: while it is set (speech output
/// playing or a response in flight) captured audio is discarded and the VAD
/// stays quiet.
pub fn spawn(
    cfg: AppConfig,
    suppress: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<SessionOutput>,
) -> SessionHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let notify = Arc::new(Notify::new());
    let task_cancel = cancel.clone();
    let task_notify = notify.clone();
    let task_tx = tx.clone();

    let join = tokio::spawn(async move {
        if let Err(e) = run_session(cfg, suppress, task_cancel, task_notify, task_tx.clone()).await
        {
            let _ = task_tx.send(SessionOutput::Error(e.to_string()));
            let _ = task_tx.send(SessionOutput::StateChange(SessionState::Error));
        }
        let _ = task_tx.send(SessionOutput::Ended);
    });

    SessionHandle {
        cancel,
        notify,
        join,
    }
}

async fn run_session(
    cfg: AppConfig,
    suppress: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
    tx: mpsc::UnboundedSender<SessionOutput>,
) -> anyhow::Result<()> {
    let mut fsm = SessionFsm::new();
    fsm.apply(SessionInput::StartRequested);
    let _ = tx.send(SessionOutput::StateChange(SessionState::Connecting));

    let mut stt = create_stt_adapter(&cfg.stt)?;
    if let SttAdapter::Stream(s) = &mut stt {
        s.connect().await?;
        let _ = tx.send(SessionOutput::Connectivity { connected: true });
    }

    let (producer, consumer) = capture_ring_buffer();
    let capture = start_capture(producer, cfg.input_device.as_deref())?;

    fsm.apply(SessionInput::Ready);
    let _ = tx.send(SessionOutput::StateChange(SessionState::Listening));
    info!("Listening session started");

    let vad = VadProcessor::new(cfg.vad.threshold, cfg.silence_debounce());
    let mut driver = SessionDriver {
        cfg,
        fsm,
        vad,
        stt,
        consumer,
        capture,
        utterance: None,
        suppress,
        cancel,
        notify,
        tx,
    };

    let result = driver.run().await;

    if let SttAdapter::Stream(s) = &mut driver.stt {
        s.disconnect();
    }
    info!("Listening session ended");
    result
}

struct SessionDriver {
    cfg: AppConfig,
    fsm: SessionFsm,
    vad: VadProcessor,
    stt: SttAdapter,
    consumer: CaptureConsumer,
    capture: CaptureStream,
    utterance: Option<Utterance>,
    suppress: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
    tx: mpsc::UnboundedSender<SessionOutput>,
}

impl SessionDriver {
    fn emit(&self, out: SessionOutput) {
        let _ = self.tx.send(out);
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut frame = vec![0.0f32; FRAME_SAMPLES];

        loop {
            tick.tick().await;
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }

            // A device error mid-capture is fatal to the session; the
            // partial utterance is discarded.
            if let Ok(msg) = self.capture.error_rx.try_recv() {
                if let Some(mut u) = self.utterance.take() {
                    u.discard();
                }
                anyhow::bail!(msg);
            }

            self.pump_stream_events().await?;
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }

            // Self-trigger suppression: while the assistant is speaking or a
            // response is in flight, captured audio is dropped unseen.
            if self.suppress.load(Ordering::SeqCst) {
                let _ = self.consumer.drain();
                self.vad.reset();
                continue;
            }

            while self.consumer.available() >= FRAME_SAMPLES {
                let n = self.consumer.pop(&mut frame);
                self.process_frame(&frame[..n]).await?;
                if !self.fsm.is(SessionState::Listening) && !self.fsm.is(SessionState::Capturing)
                {
                    break;
                }
            }
        }
        Ok(())
    }

    async fn process_frame(&mut self, frame: &[f32]) -> anyhow::Result<()> {
        let is_speech = self.vad.process_frame(frame);

        match self.fsm.state() {
            SessionState::Listening if is_speech => {
                self.fsm.apply(SessionInput::EnergyAbove);
                self.emit(SessionOutput::StateChange(SessionState::Capturing));
                self.emit(SessionOutput::RecordingStart);
                let mut utterance = Utterance::begin();
                utterance.extend(frame);
                debug!(utterance = %utterance.id, "Speech start");
                self.utterance = Some(utterance);
                self.forward_frame(frame).await;
            }
            SessionState::Capturing => {
                if let Some(u) = self.utterance.as_mut() {
                    u.extend(frame);
                }
                self.forward_frame(frame).await;
                if !is_speech && self.vad.silence_exceeded() {
                    self.fsm.apply(SessionInput::SilenceElapsed);
                    self.emit(SessionOutput::StateChange(SessionState::Finalizing));
                    self.emit(SessionOutput::RecordingStop);
                    self.finalize_utterance().await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Streaming mode pushes each captured frame as it arrives. A send
    /// failure is not handled here; the reader task reports the close and
    /// the reconnect path takes over.
    async fn forward_frame(&mut self, frame: &[f32]) {
        if let SttAdapter::Stream(s) = &mut self.stt {
            if let Err(e) = s.send_audio(frame).await {
                debug!("Audio frame not sent: {e}");
            }
        }
    }

    /// Drain pending transport events; blocks only to reconnect.
    async fn pump_stream_events(&mut self) -> anyhow::Result<()> {
        loop {
            let ev = match &mut self.stt {
                SttAdapter::Stream(s) => s.try_next_event(),
                SttAdapter::Batch(_) => None,
            };
            let Some(ev) = ev else { return Ok(()) };

            match ev {
                StreamEvent::Transcript(t) if !t.is_final => {
                    self.emit(SessionOutput::Transcript {
                        text: t.text,
                        is_final: false,
                    });
                }
                StreamEvent::Transcript(t) => {
                    // The backend's own end-of-speech detector can settle an
                    // utterance before our silence debounce does.
                    if self.fsm.is(SessionState::Capturing) {
                        self.emit(SessionOutput::RecordingStop);
                        if let Some(mut u) = self.utterance.take() {
                            u.finalize();
                        }
                        self.fsm.apply(SessionInput::SilenceElapsed);
                        self.accept_final(&t.text);
                        self.reset_for_next_utterance();
                    } else {
                        self.accept_final(&t.text);
                    }
                }
                StreamEvent::Error(message) => {
                    self.emit(SessionOutput::Error(message));
                }
                StreamEvent::Closed { clean } => {
                    self.emit(SessionOutput::Connectivity { connected: false });
                    if clean {
                        anyhow::bail!("Transcription server closed the connection");
                    }
                    self.recover_connection().await?;
                }
            }
        }
    }

    /// Bounded reconnect after an abnormal close. Terminal failure ends the
    /// session; auto-reconnects stop until listening is re-initiated.
    async fn recover_connection(&mut self) -> anyhow::Result<()> {
        self.fsm.apply(SessionInput::SocketClosed);
        self.emit(SessionOutput::StateChange(SessionState::Connecting));
        if let Some(mut u) = self.utterance.take() {
            u.discard();
        }

        let SttAdapter::Stream(s) = &mut self.stt else {
            return Ok(());
        };
        let notify = self.notify.clone();
        tokio::select! {
            result = s.reconnect() => result?,
            _ = notify.notified() => return Ok(()),
        }

        self.emit(SessionOutput::Connectivity { connected: true });
        self.fsm.apply(SessionInput::Reconnected);
        self.emit(SessionOutput::StateChange(SessionState::Listening));
        self.vad.reset();
        let _ = self.consumer.drain();
        Ok(())
    }

    /// End of utterance: pull the ring-buffer residue, hand the audio to
    /// the transport, wait for the final transcript, release the buffer.
    async fn finalize_utterance(&mut self) -> anyhow::Result<()> {
        let residue = self.consumer.drain();
        let Some(mut utterance) = self.utterance.take() else {
            self.reset_for_next_utterance();
            return Ok(());
        };
        utterance.extend(&residue);
        utterance.finalize();
        debug!(
            utterance = %utterance.id,
            samples = utterance.samples.len(),
            "Finalizing utterance"
        );

        let outcome = match &mut self.stt {
            SttAdapter::Batch(b) => match b.transcribe(&utterance.samples).await {
                Ok(text) => FinalWait::Text(text),
                Err(e) => {
                    self.emit(SessionOutput::Error(e.to_string()));
                    FinalWait::Nothing
                }
            },
            SttAdapter::Stream(s) => {
                if !residue.is_empty() {
                    let _ = s.send_audio(&residue).await;
                }
                if let Err(e) = s.finalize().await {
                    let _ = self.tx.send(SessionOutput::Error(e.to_string()));
                }
                wait_for_final(s, &self.tx).await?
            }
        };

        // Buffer released after handoff
        drop(utterance);

        match outcome {
            FinalWait::Text(text) => self.accept_final(&text),
            FinalWait::Nothing => {}
            FinalWait::ConnectionLost => self.recover_connection().await?,
        }
        self.reset_for_next_utterance();
        Ok(())
    }

    /// Apply the script policy and hand an accepted transcript upward.
    fn accept_final(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            debug!("Empty final transcript discarded");
            return;
        }
        if !has_expected_script(&self.cfg.language, text) {
            info!(text = %text, language = %self.cfg.language, "Transcript rejected by script policy");
            return;
        }
        self.emit(SessionOutput::Transcript {
            text: text.to_string(),
            is_final: true,
        });
        self.emit(SessionOutput::FinalTranscript(text.to_string()));
    }

    fn reset_for_next_utterance(&mut self) {
        self.vad.reset();
        // Audio captured while finalizing is stale
        let _ = self.consumer.drain();
        if self.fsm.apply(SessionInput::TranscriptDone).is_some() {
            self.emit(SessionOutput::StateChange(SessionState::Listening));
        }
    }
}

/// How waiting for an utterance's final transcript ended.
enum FinalWait {
    Text(String),
    Nothing,
    /// The socket dropped mid-wait; the caller runs the reconnect path.
    ConnectionLost,
}

/// Wait for the streaming backend to settle the utterance, forwarding any
/// late interim events. A timeout counts as a lost transcript, not a dead
/// session.
async fn wait_for_final(
    s: &mut crate::stt::stream::StreamingStt,
    tx: &mpsc::UnboundedSender<SessionOutput>,
) -> anyhow::Result<FinalWait> {
    let deadline = tokio::time::Instant::now() + FINAL_TRANSCRIPT_TIMEOUT;
    loop {
        let ev = tokio::time::timeout_at(deadline, s.next_event()).await;
        match ev {
            Ok(Some(StreamEvent::Transcript(t))) if t.is_final => {
                return Ok(FinalWait::Text(t.text))
            }
            Ok(Some(StreamEvent::Transcript(t))) => {
                let _ = tx.send(SessionOutput::Transcript {
                    text: t.text,
                    is_final: false,
                });
            }
            Ok(Some(StreamEvent::Error(message))) => {
                let _ = tx.send(SessionOutput::Error(message));
                return Ok(FinalWait::Nothing);
            }
            Ok(Some(StreamEvent::Closed { clean })) => {
                let _ = tx.send(SessionOutput::Connectivity { connected: false });
                if clean {
                    anyhow::bail!("Transcription server closed the connection");
                }
                return Ok(FinalWait::ConnectionLost);
            }
            Ok(None) => return Ok(FinalWait::Nothing),
            Err(_) => {
                warn!("Timed out waiting for final transcript");
                return Ok(FinalWait::Nothing);
            }
        }
    }
}

/// Whether `text` contains at least one character of the script expected
/// for `language` (ISO 639-1). Latin-script languages check for ASCII
/// letters; others check their Unicode block.
pub fn has_expected_script(language: &str, text: &str) -> bool {
    let in_block = |c: char, lo: u32, hi: u32| (lo..=hi).contains(&(c as u32));
    text.chars().any(|c| match language {
        "ru" | "uk" | "bg" | "sr" => in_block(c, 0x0400, 0x04FF),
        "el" => in_block(c, 0x0370, 0x03FF),
        "ar" => in_block(c, 0x0600, 0x06FF),
        "he" => in_block(c, 0x0590, 0x05FF),
        "hi" => in_block(c, 0x0900, 0x097F),
        "ja" => in_block(c, 0x3040, 0x30FF) || in_block(c, 0x4E00, 0x9FFF),
        "zh" => in_block(c, 0x4E00, 0x9FFF),
        "ko" => in_block(c, 0xAC00, 0xD7AF),
        _ => c.is_ascii_alphabetic(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utterance_lifecycle() {
        let mut u = Utterance::begin();
        assert_eq!(u.state, UtteranceState::Capturing);
        assert!(u.ended_at.is_none());
        u.extend(&[0.1, 0.2]);
        u.extend(&[0.3]);
        assert_eq!(u.samples.len(), 3);
        u.finalize();
        assert_eq!(u.state, UtteranceState::Finalized);
        assert!(u.ended_at.is_some());
    }

    #[test]
    fn test_discard_releases_buffer() {
        let mut u = Utterance::begin();
        u.extend(&[0.5; 1000]);
        u.discard();
        assert_eq!(u.state, UtteranceState::Discarded);
        assert!(u.samples.is_empty());
    }

    #[test]
    fn test_script_policy_latin() {
        assert!(has_expected_script("en", "hello world"));
        assert!(has_expected_script("en", "123 ok"));
        assert!(!has_expected_script("en", "123 456 !!!"));
        assert!(!has_expected_script("en", "こんにちは"));
    }

    #[test]
    fn test_script_policy_non_latin() {
        assert!(has_expected_script("ru", "привет"));
        assert!(!has_expected_script("ru", "privet"));
        assert!(has_expected_script("ja", "こんにちは"));
        assert!(has_expected_script("ja", "日本語"));
        assert!(!has_expected_script("ja", "hello"));
        assert!(has_expected_script("ko", "안녕하세요"));
    }

    #[test]
    fn test_script_policy_unknown_language_defaults_to_latin() {
        assert!(has_expected_script("xx", "word"));
        assert!(!has_expected_script("xx", "…"));
    }
}
