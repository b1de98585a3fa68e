//! Speech output: synthesis engines and playback.
//!
//! Engines implement the dyn-compatible [`TtsEngine`] trait; [`Speaker`]
//! pairs the configured engine with the player thread and enforces that at
//! most one utterance plays at a time. Synthesis failures are non-fatal: the
//! caller logs them and the conversation continues without audio.

pub mod cloud;
pub mod local;
pub mod playback;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::TtsConfig;

/// Synthesized audio with the rate it was produced at.
pub struct TtsAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl TtsAudio {
    pub fn empty(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
        }
    }
}

/// Common trait for synthesis engines (dyn-compatible).
pub trait TtsEngine: Send + Sync {
    /// Synthesize text to PCM samples.
    fn speak(
        &self,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TtsAudio>> + Send + '_>>;

    /// Interrupt any in-progress synthesis.
    fn stop(&self);

    /// Display name for this engine.
    fn name(&self) -> String;
}

/// Create a synthesis engine from config.
///
/// `adapter` is "openai" (cloud PCM) or "local" (on-device synthesizer).
pub fn create_tts_engine(cfg: &TtsConfig) -> anyhow::Result<Box<dyn TtsEngine>> {
    match cfg.adapter.as_str() {
        "openai" => {
            let key = cfg
                .api_key
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Cloud TTS requires an API key"))?;
            Ok(Box::new(cloud::CloudTts::new(key, &cfg.voice)))
        }
        "local" => Ok(Box::new(local::LocalTts::new(&cfg.voice))),
        other => anyhow::bail!("Unknown TTS adapter: {}", other),
    }
}

/// Engine plus player: the single speech-output surface the rest of the
/// engine talks to.
pub struct Speaker {
    engine: Box<dyn TtsEngine>,
    player: playback::AudioPlayer,
}

impl Speaker {
    /// Build the configured speaker. Returns the done-signal channel that
    /// fires once per finished (or stopped) utterance.
    pub fn new(cfg: &TtsConfig) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<()>)> {
        let engine = create_tts_engine(cfg)?;
        let (player, done_rx) = playback::AudioPlayer::new()?;
        player.set_volume(cfg.volume);
        debug!(engine = %engine.name(), "Speech output ready");
        Ok((Self { engine, player }, done_rx))
    }

    /// Synthesize and start playing, cancelling any current utterance.
    /// Empty text is a no-op. Returns once playback has started.
    pub async fn speak(&self, text: &str) -> anyhow::Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let audio = self.engine.speak(text).await?;
        if audio.samples.is_empty() {
            return Ok(());
        }
        self.player.play(audio.samples, audio.sample_rate);
        Ok(())
    }

    /// Stop synthesis and playback.
    pub fn stop(&self) {
        self.engine.stop();
        self.player.stop();
    }

    pub fn pause(&self) {
        self.player.pause();
    }

    pub fn resume(&self) {
        self.player.resume();
    }

    /// Whether speech is playing; the VAD gate reads this so the assistant
    /// does not trigger on its own voice.
    pub fn is_playing(&self) -> bool {
        self.player.is_playing()
    }
}
