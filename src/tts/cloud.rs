//! Cloud speech synthesis via an OpenAI-style `audio/speech` endpoint.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use super::{TtsAudio, TtsEngine};

/// Raw PCM from the endpoint is 24 kHz 16-bit mono.
const CLOUD_PCM_RATE: u32 = 24_000;

pub struct CloudTts {
    api_key: String,
    voice: String,
    model: String,
    interrupted: AtomicBool,
    client: reqwest::Client,
}

impl CloudTts {
    pub fn new(api_key: &str, voice: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            voice: voice.to_string(),
            model: "tts-1".to_string(),
            interrupted: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }
}

impl TtsEngine for CloudTts {
    fn speak(
        &self,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TtsAudio>> + Send + '_>> {
        let text = text.to_string();
        Box::pin(async move {
            self.interrupted.store(false, Ordering::SeqCst);

            if text.trim().is_empty() {
                return Ok(TtsAudio::empty(CLOUD_PCM_RATE));
            }

            info!(voice = %self.voice, text_len = text.len(), "Cloud TTS request");

            let body = serde_json::json!({
                "model": self.model,
                "input": text,
                "voice": self.voice,
                "response_format": "pcm",
            });

            let resp = self
                .client
                .post("https://api.openai.com/v1/audio/speech")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Cloud TTS request failed: {e}"))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("Cloud TTS API error {}: {}", status, body);
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read cloud TTS response: {e}"))?;

            if self.interrupted.load(Ordering::SeqCst) {
                return Ok(TtsAudio::empty(CLOUD_PCM_RATE));
            }

            let samples: Vec<f32> = bytes
                .chunks_exact(2)
                .map(|chunk| {
                    let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                    sample as f32 / 32768.0
                })
                .collect();

            info!(samples = samples.len(), "Cloud TTS synthesis complete");
            Ok(TtsAudio {
                samples,
                sample_rate: CLOUD_PCM_RATE,
            })
        })
    }

    fn stop(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> String {
        format!("Cloud TTS ({})", self.voice)
    }
}
