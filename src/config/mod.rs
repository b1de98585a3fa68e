//! Configuration loading and data directory paths.
//!
//! All tunables live in `config.json` in the platform data directory.
//! Every field has a default so a missing or partial file still yields a
//! working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Top-level configuration for the voice engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub vad: VadConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub exec: ExecConfig,
    /// Expected input language (ISO 639-1). Used to reject transcripts whose
    /// text contains no characters of the language's script.
    pub language: String,
    /// Attach a full-screen capture to every voice turn.
    pub attach_screenshot: bool,
    /// Named input device; `None` uses the system default.
    pub input_device: Option<String>,
}

/// Voice activity detection tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy threshold for a frame to count as speech (full scale = 1.0).
    pub threshold: f32,
    /// Sustained silence before an utterance is finalized, in milliseconds.
    pub silence_ms: u64,
}

/// Transcription backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// "stream" (persistent WebSocket) or "batch" (per-utterance upload).
    pub adapter: String,
    pub stream_url: String,
    pub batch_endpoint: String,
    pub api_key: Option<String>,
    pub connect_timeout_ms: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_backoff_ms: u64,
    pub reconnect_min_interval_ms: u64,
}

/// Language-model backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Model used when any turn in the history carries an image.
    pub vision_model: String,
    /// Maximum history length after trimming (system message included).
    pub history_cap: usize,
}

/// Speech synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// "local" (on-device synthesizer) or "openai" (cloud PCM).
    pub adapter: String,
    pub voice: String,
    pub api_key: Option<String>,
    pub volume: f32,
}

/// Command executor timing and OS automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Settle delay after OPEN when the next command is TYPE, in milliseconds.
    pub settle_before_type_ms: u64,
    /// Settle delay after OPEN for any other following command.
    pub settle_after_open_ms: u64,
    /// Focusing click target after OPEN (screen center by default).
    pub focus_x: i32,
    pub focus_y: i32,
    /// Search engine base URL; the query is appended percent-encoded as `q`.
    pub search_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            stt: SttConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
            exec: ExecConfig::default(),
            language: "en".to_string(),
            attach_screenshot: false,
            input_device: None,
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.07,
            silence_ms: 2500,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            adapter: "stream".to_string(),
            stream_url: "ws://localhost:8766".to_string(),
            batch_endpoint: "http://localhost:8767/transcribe".to_string(),
            api_key: None,
            connect_timeout_ms: 3000,
            reconnect_max_attempts: 5,
            reconnect_backoff_ms: 2000,
            reconnect_min_interval_ms: 2000,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            vision_model: "gpt-4o".to_string(),
            history_cap: 21,
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            adapter: "local".to_string(),
            voice: "alloy".to_string(),
            api_key: None,
            volume: 0.8,
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            settle_before_type_ms: 3000,
            settle_after_open_ms: 2000,
            focus_x: 960,
            focus_y: 540,
            search_url: "https://www.google.com/search".to_string(),
        }
    }
}

impl AppConfig {
    pub fn silence_debounce(&self) -> Duration {
        Duration::from_millis(self.vad.silence_ms)
    }
}

impl ExecConfig {
    pub fn settle_before_type(&self) -> Duration {
        Duration::from_millis(self.settle_before_type_ms)
    }

    pub fn settle_after_open(&self) -> Duration {
        Duration::from_millis(self.settle_after_open_ms)
    }
}

impl SttConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn reconnect_min_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_interval_ms)
    }
}

/// Data directory for config and logs (`~/.local/share/navi-core` or the
/// platform equivalent).
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("navi-core"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Path to config.json.
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Load configuration from disk, falling back to defaults on any problem.
pub fn load() -> AppConfig {
    let path = config_path();
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                AppConfig::default()
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.vad.silence_ms, 2500);
        assert!((cfg.vad.threshold - 0.07).abs() < f32::EPSILON);
        assert_eq!(cfg.stt.reconnect_max_attempts, 5);
        assert_eq!(cfg.llm.history_cap, 21);
        assert_eq!(cfg.exec.settle_before_type_ms, 3000);
        assert_eq!(cfg.exec.settle_after_open_ms, 2000);
        assert_eq!(cfg.language, "en");
    }

    #[test]
    fn test_partial_config_parses() {
        let json = r#"{"vad": {"threshold": 0.1}}"#;
        let cfg: AppConfig = serde_json::from_str(json).unwrap();
        assert!((cfg.vad.threshold - 0.1).abs() < f32::EPSILON);
        // Unspecified fields fall back to defaults
        assert_eq!(cfg.vad.silence_ms, 2500);
        assert_eq!(cfg.stt.adapter, "stream");
        assert_eq!(cfg.language, "en");
    }

    #[test]
    fn test_config_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = AppConfig::default();
        cfg.llm.history_cap = 11;
        std::fs::write(&path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();
        let loaded: AppConfig =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.llm.history_cap, 11);
    }
}
