//! navi-core — continuous voice-command engine.
//!
//! Headless process driven by a UI shell over JSON-line IPC on stdin/stdout.
//! The supervisor here owns the conversation, the speech output and at most
//! one listening session at a time; the session driver feeds it final
//! transcripts, which run through the conversation, the command parser, and
//! then the executor and speech output concurrently.

mod audio;
mod automation;
mod command;
mod config;
mod conversation;
mod ipc;
mod session;
mod stt;
mod tts;
mod vad;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use automation::{Automation, OsAutomation};
use command::executor::{self, ExecutorEvent};
use config::AppConfig;
use conversation::{prompt, ConversationManager};
use ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use ipc::{EngineCommand, EngineEvent};
use session::{SessionHandle, SessionOutput, SessionState};
use tts::Speaker;

#[tokio::main]
async fn main() {
    let data_dir = config::data_dir();
    let _ = std::fs::create_dir_all(data_dir.join("logs"));
    let file_appender = tracing_appender::rolling::daily(data_dir.join("logs"), "navi-core.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // stdout carries the IPC protocol, so logs go to stderr and the file.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    emit_event(&EngineEvent::Starting {});

    let cfg = config::load();
    info!(
        stt = %cfg.stt.adapter,
        tts = %cfg.tts.adapter,
        language = %cfg.language,
        "Configuration loaded"
    );

    let (engine, receivers) = match Engine::new(cfg) {
        Ok(pair) => pair,
        Err(e) => {
            error!("Startup failed: {e}");
            emit_error(format!("Startup failed: {e}"));
            return;
        }
    };

    emit_event(&EngineEvent::Ready {});
    info!("Voice engine ready");

    engine.run(spawn_stdin_reader(), receivers).await;
    info!("Voice engine shutting down");
}

/// Channels the supervisor loop selects over.
struct Receivers {
    session: mpsc::UnboundedReceiver<SessionOutput>,
    exec: mpsc::UnboundedReceiver<ExecutorEvent>,
    speech_done: mpsc::UnboundedReceiver<()>,
    /// Keeps the dummy done-channel open when speech output is unavailable.
    _speech_keepalive: Option<mpsc::UnboundedSender<()>>,
}

struct Engine {
    cfg: AppConfig,
    conversation: ConversationManager,
    automation: Arc<dyn Automation>,
    speaker: Option<Speaker>,
    /// Self-trigger gate: set while a response is in flight or the
    /// assistant is speaking; the session drops captured audio meanwhile.
    suppress: Arc<AtomicBool>,
    session: Option<SessionHandle>,
    session_tx: mpsc::UnboundedSender<SessionOutput>,
    exec_tx: mpsc::UnboundedSender<ExecutorEvent>,
}

impl Engine {
    fn new(cfg: AppConfig) -> anyhow::Result<(Self, Receivers)> {
        let conversation = ConversationManager::new(cfg.llm.clone(), prompt::system_prompt())?;
        let automation: Arc<dyn Automation> =
            Arc::new(OsAutomation::new(cfg.exec.search_url.clone()));

        // Speech output is optional: without an output device or a usable
        // engine the conversation continues silently.
        let (speaker, speech_done, keepalive) = match Speaker::new(&cfg.tts) {
            Ok((speaker, done_rx)) => (Some(speaker), done_rx, None),
            Err(e) => {
                warn!("Speech output unavailable: {e}");
                let (tx, rx) = mpsc::unbounded_channel();
                (None, rx, Some(tx))
            }
        };

        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (exec_tx, exec_rx) = mpsc::unbounded_channel();

        let engine = Self {
            cfg,
            conversation,
            automation,
            speaker,
            suppress: Arc::new(AtomicBool::new(false)),
            session: None,
            session_tx,
            exec_tx,
        };
        let receivers = Receivers {
            session: session_rx,
            exec: exec_rx,
            speech_done,
            _speech_keepalive: keepalive,
        };
        Ok((engine, receivers))
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
        mut receivers: Receivers,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                },
                Some(ev) = receivers.session.recv() => {
                    self.handle_session_output(ev).await;
                }
                Some(ev) = receivers.exec.recv() => {
                    self.handle_executor_event(ev);
                }
                Some(()) = receivers.speech_done.recv() => {
                    emit_event(&EngineEvent::SpeakingEnd {});
                    self.suppress.store(false, Ordering::SeqCst);
                }
            }
        }

        if let Some(handle) = self.session.take() {
            handle.cancel();
            let _ = handle.join.await;
        }
    }

    /// Returns `false` when the main loop should exit.
    async fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Ping {} => emit_event(&EngineEvent::Pong {}),
            EngineCommand::Stop {} => {
                emit_event(&EngineEvent::Stopping {});
                return false;
            }
            EngineCommand::ListAudioDevices {} => {
                emit_event(&EngineEvent::AudioDevices {
                    input: audio::list_input_devices(),
                    output: audio::list_output_devices(),
                });
            }
            EngineCommand::StartListening {} => self.start_listening().await,
            EngineCommand::StopListening {} => {
                self.stop_listening().await;
                emit_event(&EngineEvent::StateChange {
                    state: SessionState::Idle,
                });
            }
            EngineCommand::SystemSpeak { text } => {
                if self.speak(&text).await {
                    self.suppress.store(true, Ordering::SeqCst);
                }
            }
            EngineCommand::Query {
                text,
                image,
                with_screen,
            } => {
                let image = match image {
                    Some(image) => Some(image),
                    None if with_screen || self.cfg.attach_screenshot => {
                        self.capture_screen().await
                    }
                    None => None,
                };
                self.suppress.store(true, Ordering::SeqCst);
                self.run_turn(text, image).await;
            }
        }
        true
    }

    /// Start a listening session, refusing to overlap with one whose
    /// teardown has not finished yet.
    async fn start_listening(&mut self) {
        if let Some(handle) = self.session.take() {
            if handle.join.is_finished() {
                let _ = handle.join.await;
            } else {
                self.session = Some(handle);
                emit_error("Already listening");
                return;
            }
        }
        self.suppress.store(false, Ordering::SeqCst);
        self.session = Some(session::spawn(
            self.cfg.clone(),
            self.suppress.clone(),
            self.session_tx.clone(),
        ));
    }

    /// Stop the session and wait for the microphone teardown to complete.
    /// In-flight executor queues keep running.
    async fn stop_listening(&mut self) {
        if let Some(handle) = self.session.take() {
            handle.cancel();
            let _ = handle.join.await;
        }
    }

    async fn handle_session_output(&mut self, ev: SessionOutput) {
        match ev {
            SessionOutput::StateChange(state) => {
                emit_event(&EngineEvent::StateChange { state });
            }
            SessionOutput::RecordingStart => emit_event(&EngineEvent::RecordingStart {}),
            SessionOutput::RecordingStop => emit_event(&EngineEvent::RecordingStop {}),
            SessionOutput::Transcript { text, is_final } => {
                emit_event(&EngineEvent::Transcription { text, is_final });
            }
            SessionOutput::Connectivity { connected } => {
                emit_event(&EngineEvent::Connectivity { connected });
            }
            SessionOutput::Error(message) => emit_error(message),
            SessionOutput::Ended => {
                if let Some(handle) = self.session.take() {
                    if handle.join.is_finished() {
                        let _ = handle.join.await;
                    } else {
                        self.session = Some(handle);
                    }
                }
            }
            SessionOutput::FinalTranscript(text) => {
                self.suppress.store(true, Ordering::SeqCst);
                let image = if self.cfg.attach_screenshot {
                    self.capture_screen().await
                } else {
                    None
                };
                self.run_turn(text, image).await;
            }
        }
    }

    /// One assistant turn: conversation round-trip, parse, then the
    /// executor and speech output run concurrently.
    async fn run_turn(&mut self, text: String, image: Option<String>) {
        info!(text = %text, has_image = image.is_some(), "User turn");
        self.conversation.push_user_turn(text, image);

        let reply = match self.conversation.request_completion().await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Completion failed: {e}");
                emit_error(format!("Assistant unavailable: {e}"));
                self.suppress.store(false, Ordering::SeqCst);
                return;
            }
        };
        self.conversation.push_assistant_turn(&reply);

        let parsed = command::parse(&reply);
        emit_event(&EngineEvent::Response {
            text: parsed.display_text.clone(),
        });

        if !parsed.commands.is_empty() {
            // Detached on purpose: playback below starts without waiting
            // for the queue. Progress arrives through the executor channel.
            let _handle = executor::spawn(
                parsed.commands,
                self.automation.clone(),
                self.cfg.exec.clone(),
                self.exec_tx.clone(),
            );
        }

        let speaking = self.speak(&parsed.display_text).await;
        if !speaking {
            self.suppress.store(false, Ordering::SeqCst);
        }
    }

    /// Synthesize and start playback. Returns whether audio is actually
    /// playing; failures are logged and non-fatal.
    async fn speak(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let Some(speaker) = &self.speaker else {
            return false;
        };
        emit_event(&EngineEvent::SpeakingStart {
            text: text.to_string(),
        });
        match speaker.speak(text).await {
            Ok(()) if speaker.is_playing() => true,
            Ok(()) => {
                emit_event(&EngineEvent::SpeakingEnd {});
                false
            }
            Err(e) => {
                warn!("Speech synthesis failed: {e}");
                emit_event(&EngineEvent::SpeakingEnd {});
                false
            }
        }
    }

    fn handle_executor_event(&self, ev: ExecutorEvent) {
        match ev {
            ExecutorEvent::Dispatched { kind, payload } => {
                emit_event(&EngineEvent::CommandDispatch { kind, payload });
            }
            ExecutorEvent::CommandFailed {
                kind,
                payload,
                error,
            } => {
                emit_error(format!("{kind}:{payload} failed: {error}"));
            }
            ExecutorEvent::Finished => debug!("Command queue drained"),
        }
    }

    async fn capture_screen(&self) -> Option<String> {
        match tokio::task::spawn_blocking(automation::capture_screen).await {
            Ok(Ok(data_url)) => Some(data_url),
            Ok(Err(e)) => {
                warn!("Screen capture failed: {e}");
                None
            }
            Err(e) => {
                warn!("Screen capture task failed: {e}");
                None
            }
        }
    }
}
