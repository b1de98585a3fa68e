//! Audio playback on a dedicated player thread.
//!
//! rodio's output stream is tied to the thread that created it, so a player
//! thread owns the device and takes commands over a channel (the same
//! blocking-thread-to-async bridge as the stdin reader). Starting a new
//! utterance stops the current one, so at most one plays at a time; a done
//! signal is forwarded to the async side when the queue drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tokio::sync::mpsc as async_mpsc;
use tracing::{debug, error};

enum PlayerCommand {
    Play { samples: Vec<f32>, sample_rate: u32 },
    Stop,
    Pause,
    Resume,
    SetVolume(f32),
}

/// Handle to the player thread.
pub struct AudioPlayer {
    tx: Sender<PlayerCommand>,
    playing: Arc<AtomicBool>,
}

impl AudioPlayer {
    /// Open the default output device on a new player thread. Returns the
    /// player and the channel that signals when an utterance finishes.
    pub fn new() -> anyhow::Result<(Self, async_mpsc::UnboundedReceiver<()>)> {
        let (tx, rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = async_mpsc::unbounded_channel();
        let (init_tx, init_rx) = std::sync::mpsc::channel();
        let playing = Arc::new(AtomicBool::new(false));
        let thread_playing = playing.clone();

        std::thread::Builder::new()
            .name("audio-player".into())
            .spawn(move || player_loop(rx, thread_playing, done_tx, init_tx))?;

        // The thread reports whether the output device opened.
        init_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("Audio player thread died during startup"))??;

        Ok((Self { tx, playing }, done_rx))
    }

    /// Play an utterance, cancelling and replacing any current one.
    pub fn play(&self, samples: Vec<f32>, sample_rate: u32) {
        self.playing.store(true, Ordering::SeqCst);
        let _ = self.tx.send(PlayerCommand::Play {
            samples,
            sample_rate,
        });
    }

    /// Stop playback immediately and drop the queued audio.
    pub fn stop(&self) {
        let _ = self.tx.send(PlayerCommand::Stop);
    }

    pub fn pause(&self) {
        let _ = self.tx.send(PlayerCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(PlayerCommand::Resume);
    }

    /// Playback volume, clamped to [0, 1].
    pub fn set_volume(&self, volume: f32) {
        let _ = self.tx.send(PlayerCommand::SetVolume(volume));
    }

    /// Whether an utterance is currently playing (or paused mid-utterance).
    /// The VAD gate reads this to suppress self-triggering.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

fn player_loop(
    rx: Receiver<PlayerCommand>,
    playing: Arc<AtomicBool>,
    done_tx: async_mpsc::UnboundedSender<()>,
    init_tx: Sender<anyhow::Result<()>>,
) {
    let device = OutputStream::try_default()
        .map_err(|e| anyhow::anyhow!("Failed to open audio output: {e}"))
        .and_then(|(stream, handle)| {
            let sink = Sink::try_new(&handle)
                .map_err(|e| anyhow::anyhow!("Failed to create audio sink: {e}"))?;
            Ok((stream, handle, sink))
        });

    let (_stream, handle, mut sink) = match device {
        Ok(parts) => {
            let _ = init_tx.send(Ok(()));
            parts
        }
        Err(e) => {
            error!("Audio player startup failed: {e}");
            let _ = init_tx.send(Err(e));
            return;
        }
    };
    let mut volume = 1.0f32;

    loop {
        // Block when idle; poll while playing so queue drain is noticed.
        let cmd = if playing.load(Ordering::SeqCst) {
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(cmd) => Some(cmd),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            }
        };

        match cmd {
            Some(PlayerCommand::Play {
                samples,
                sample_rate,
            }) => {
                // A fresh sink per utterance: stop() leaves some rodio
                // versions unable to play again.
                sink.stop();
                sink = match Sink::try_new(&handle) {
                    Ok(new_sink) => new_sink,
                    Err(e) => {
                        error!("Failed to recreate audio sink: {e}");
                        playing.store(false, Ordering::SeqCst);
                        let _ = done_tx.send(());
                        continue;
                    }
                };
                sink.set_volume(volume);
                debug!(samples = samples.len(), sample_rate, "Starting playback");
                sink.append(SamplesBuffer::new(1, sample_rate, samples));
                playing.store(true, Ordering::SeqCst);
            }
            Some(PlayerCommand::Stop) => {
                sink.stop();
                if playing.swap(false, Ordering::SeqCst) {
                    let _ = done_tx.send(());
                }
            }
            Some(PlayerCommand::Pause) => sink.pause(),
            Some(PlayerCommand::Resume) => sink.play(),
            Some(PlayerCommand::SetVolume(v)) => {
                volume = v.clamp(0.0, 1.0);
                sink.set_volume(volume);
            }
            None => {}
        }

        if playing.load(Ordering::SeqCst) && sink.empty() {
            playing.store(false, Ordering::SeqCst);
            let _ = done_tx.send(());
        }
    }
    debug!("Audio player thread exiting");
}
