//! On-device synthesis fallback via the platform speech tool.
//!
//! Used when no cloud API key is configured: shells out to `espeak`
//! (`say` on macOS, System.Speech on Windows) and parses the WAV it
//! produces into f32 samples.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::process::Command;
use tracing::info;

use super::{TtsAudio, TtsEngine};

pub struct LocalTts {
    voice: String,
    interrupted: AtomicBool,
}

impl LocalTts {
    pub fn new(voice: &str) -> Self {
        Self {
            voice: voice.to_string(),
            interrupted: AtomicBool::new(false),
        }
    }
}

impl TtsEngine for LocalTts {
    fn speak(
        &self,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TtsAudio>> + Send + '_>> {
        let text = text.to_string();
        Box::pin(async move {
            self.interrupted.store(false, Ordering::SeqCst);

            if text.trim().is_empty() {
                return Ok(TtsAudio::empty(22_050));
            }

            info!(text_len = text.len(), "Local TTS synthesis");
            let wav = synthesize_wav(&self.voice, &text).await?;

            if self.interrupted.load(Ordering::SeqCst) {
                return Ok(TtsAudio::empty(22_050));
            }

            let (samples, sample_rate) = parse_wav(&wav)?;
            Ok(TtsAudio {
                samples,
                sample_rate,
            })
        })
    }

    fn stop(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> String {
        "Local synthesizer".to_string()
    }
}

#[cfg(target_os = "windows")]
async fn synthesize_wav(_voice: &str, text: &str) -> anyhow::Result<Vec<u8>> {
    let path = std::env::temp_dir().join(format!("navi-tts-{}.wav", uuid::Uuid::new_v4()));
    let escaped = text.replace('\'', "''");
    let script = format!(
        "Add-Type -AssemblyName System.Speech; \
         $s = New-Object System.Speech.Synthesis.SpeechSynthesizer; \
         $s.SetOutputToWaveFile('{}'); \
         $s.Speak('{}'); \
         $s.Dispose()",
        path.display(),
        escaped
    );
    let output = Command::new("powershell")
        .args(["-WindowStyle", "Hidden", "-Command", &script])
        .output()
        .await?;
    anyhow::ensure!(output.status.success(), "Local synthesizer failed");
    let wav = std::fs::read(&path)?;
    let _ = std::fs::remove_file(&path);
    Ok(wav)
}

#[cfg(target_os = "macos")]
async fn synthesize_wav(voice: &str, text: &str) -> anyhow::Result<Vec<u8>> {
    let path = std::env::temp_dir().join(format!("navi-tts-{}.wav", uuid::Uuid::new_v4()));
    let mut cmd = Command::new("say");
    if !voice.is_empty() {
        cmd.args(["-v", voice]);
    }
    let output = cmd
        .args(["--data-format=LEI16@22050", "-o"])
        .arg(&path)
        .arg(text)
        .output()
        .await?;
    anyhow::ensure!(output.status.success(), "say exited with {}", output.status);
    let wav = std::fs::read(&path)?;
    let _ = std::fs::remove_file(&path);
    Ok(wav)
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
async fn synthesize_wav(voice: &str, text: &str) -> anyhow::Result<Vec<u8>> {
    let mut cmd = Command::new("espeak");
    if !voice.is_empty() {
        cmd.args(["-v", voice]);
    }
    let output = cmd.arg("--stdout").arg(text).output().await?;
    anyhow::ensure!(
        output.status.success(),
        "espeak exited with {}",
        output.status
    );
    Ok(output.stdout)
}

/// Parse a 16-bit PCM WAV into mono f32 samples and its sample rate.
/// Multi-channel audio is down-mixed by averaging.
fn parse_wav(bytes: &[u8]) -> anyhow::Result<(Vec<f32>, u32)> {
    anyhow::ensure!(
        bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE",
        "Not a RIFF/WAVE file"
    );

    let mut sample_rate = None;
    let mut channels: u16 = 1;
    let mut bits: u16 = 16;
    let mut data: Option<&[u8]> = None;

    // Walk the chunk list; espeak streams to stdout with a zero data-chunk
    // size, so an undersized chunk length means "rest of the file".
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        let body_start = pos + 8;
        match id {
            b"fmt " => {
                anyhow::ensure!(body_start + 16 <= bytes.len(), "Truncated fmt chunk");
                let fmt = &bytes[body_start..];
                let format = u16::from_le_bytes([fmt[0], fmt[1]]);
                anyhow::ensure!(format == 1, "Unsupported WAV format code {format}");
                channels = u16::from_le_bytes([fmt[2], fmt[3]]).max(1);
                sample_rate = Some(u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]));
                bits = u16::from_le_bytes([fmt[14], fmt[15]]);
            }
            b"data" => {
                let end = body_start.saturating_add(size).min(bytes.len());
                let end = if size == 0 { bytes.len() } else { end };
                data = Some(&bytes[body_start..end]);
            }
            _ => {}
        }
        let advance = if size == 0 { break } else { size + (size & 1) };
        pos = body_start + advance;
    }

    let sample_rate = sample_rate.ok_or_else(|| anyhow::anyhow!("WAV has no fmt chunk"))?;
    let data = data.ok_or_else(|| anyhow::anyhow!("WAV has no data chunk"))?;
    anyhow::ensure!(bits == 16, "Unsupported WAV bit depth {bits}");

    let interleaved: Vec<f32> = data
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect();

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok((samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::batch::encode_wav;

    #[test]
    fn test_parse_wav_round_trip() {
        let original: Vec<f32> = (0..320).map(|i| (i as f32 / 320.0) - 0.5).collect();
        let wav = encode_wav(&original, 16_000);
        let (parsed, rate) = parse_wav(&wav).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(parsed.len(), original.len());
        for (a, b) in parsed.iter().zip(&original) {
            assert!((a - b).abs() < 1.0 / 32000.0);
        }
    }

    #[test]
    fn test_parse_wav_rejects_garbage() {
        assert!(parse_wav(b"not a wav").is_err());
        assert!(parse_wav(b"RIFF\x00\x00\x00\x00WAVE").is_err());
    }

    #[test]
    fn test_parse_wav_zero_sized_data_chunk_reads_to_end() {
        // Streamed WAV with data size 0: samples still recovered
        let mut wav = encode_wav(&[0.25f32; 100], 22_050);
        wav[40..44].copy_from_slice(&0u32.to_le_bytes());
        let (parsed, rate) = parse_wav(&wav).unwrap();
        assert_eq!(rate, 22_050);
        assert_eq!(parsed.len(), 100);
    }
}
