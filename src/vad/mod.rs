//! Energy-based voice activity detection.
//!
//! Classifies fixed-size audio frames as speech or silence by comparing
//! short-time RMS energy against a configured threshold, and tracks how long
//! the signal has stayed below it. Silence is accumulated from frame
//! durations rather than wall-clock time, which keeps the detector
//! deterministic under test and immune to scheduling jitter.

use std::time::Duration;

use crate::audio::SAMPLE_RATE;

/// Root-mean-square energy of a frame of f32 samples in [-1.0, 1.0].
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = frame.iter().map(|s| s * s).sum();
    (sum_sq / frame.len() as f32).sqrt()
}

/// Duration covered by `n` samples at the pipeline sample rate.
fn frame_duration(n: usize) -> Duration {
    Duration::from_secs_f64(n as f64 / SAMPLE_RATE as f64)
}

/// Per-frame speech/silence classifier with a silence debounce.
///
/// The caller feeds every captured frame through [`process_frame`] and polls
/// [`silence_exceeded`] while capturing. A speech frame resets the silence
/// accumulator, so energy rising above the threshold before the debounce
/// elapses cancels the pending end-of-utterance.
///
/// [`process_frame`]: VadProcessor::process_frame
/// [`silence_exceeded`]: VadProcessor::silence_exceeded
pub struct VadProcessor {
    threshold: f32,
    debounce: Duration,
    silence_for: Duration,
}

impl VadProcessor {
    pub fn new(threshold: f32, debounce: Duration) -> Self {
        Self {
            threshold,
            debounce,
            silence_for: Duration::ZERO,
        }
    }

    /// Classify one frame. Returns `true` if the frame is speech.
    pub fn process_frame(&mut self, frame: &[f32]) -> bool {
        let is_speech = rms(frame) >= self.threshold;
        if is_speech {
            self.silence_for = Duration::ZERO;
        } else {
            self.silence_for += frame_duration(frame.len());
        }
        is_speech
    }

    /// Whether the signal has been continuously below threshold for at least
    /// the debounce duration.
    pub fn silence_exceeded(&self) -> bool {
        self.silence_for >= self.debounce
    }

    /// Clear accumulated silence (called between utterances and whenever
    /// frames are being suppressed rather than processed).
    pub fn reset(&mut self) {
        self.silence_for = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 1280; // 80 ms at 16 kHz

    fn loud() -> Vec<f32> {
        vec![0.5; FRAME]
    }

    fn quiet() -> Vec<f32> {
        vec![0.001; FRAME]
    }

    fn vad() -> VadProcessor {
        VadProcessor::new(0.07, Duration::from_millis(2500))
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert!(rms(&quiet()) < 0.07);
        assert!(rms(&loud()) > 0.07);
    }

    #[test]
    fn test_speech_detection() {
        let mut v = vad();
        assert!(v.process_frame(&loud()));
        assert!(!v.process_frame(&quiet()));
    }

    #[test]
    fn test_sustained_silence_triggers_exactly_once() {
        let mut v = vad();
        v.process_frame(&loud());
        // 2500 ms of silence = 32 frames of 80 ms (2560 ms)
        let mut fired = 0;
        for _ in 0..32 {
            v.process_frame(&quiet());
            if v.silence_exceeded() {
                fired += 1;
                v.reset();
                break;
            }
        }
        assert_eq!(fired, 1);
        // After reset, silence starts accumulating from zero again
        assert!(!v.silence_exceeded());
    }

    #[test]
    fn test_speech_before_debounce_cancels_end() {
        let mut v = vad();
        v.process_frame(&loud());
        // 30 quiet frames = 2400 ms, just under the 2500 ms debounce
        for _ in 0..30 {
            v.process_frame(&quiet());
            assert!(!v.silence_exceeded());
        }
        // Speech resumes: accumulated silence is discarded
        v.process_frame(&loud());
        for _ in 0..30 {
            v.process_frame(&quiet());
        }
        assert!(!v.silence_exceeded());
    }

    #[test]
    fn test_reset_clears_silence() {
        let mut v = vad();
        for _ in 0..40 {
            v.process_frame(&quiet());
        }
        assert!(v.silence_exceeded());
        v.reset();
        assert!(!v.silence_exceeded());
    }
}
