//! Microphone capture via cpal.
//!
//! Opens the default (or named) input device at its native sample rate,
//! down-mixes to mono and resamples to 16 kHz, then pushes samples into the
//! ring buffer for the session driver. The returned [`CaptureStream`] owns
//! the cpal stream handle; dropping it stops capture, which is how every
//! session exit path releases the microphone.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::ring_buffer::CaptureProducer;
use super::SAMPLE_RATE;

/// Handle to a running capture stream. Capture stops when this is dropped.
pub struct CaptureStream {
    _stream: Stream,
    /// Receives one message if the device errors mid-capture.
    pub error_rx: mpsc::UnboundedReceiver<String>,
}

// cpal's Stream is !Send on some hosts; the session driver owns the handle
// for its whole lifetime and never moves it across threads after creation.
unsafe impl Send for CaptureStream {}

/// List available input device names.
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// List available output device names.
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.output_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// Find the requested input device, or the system default.
fn resolve_device(device_name: Option<&str>) -> anyhow::Result<cpal::Device> {
    let host = cpal::default_host();
    let device = if let Some(name) = device_name {
        host.input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow::anyhow!("Input device not found: {name}"))?
    } else {
        host.default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No default input device available"))?
    };
    Ok(device)
}

/// Linear resampler, mono f32.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Down-mix interleaved multi-channel audio to mono by averaging.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Start capturing from the microphone into `producer`.
///
/// Audio lands in the ring buffer as 16 kHz mono f32. A device error while
/// capturing is reported once through `error_rx` so the session can treat it
/// as fatal and tear down.
pub fn start_capture(
    mut producer: CaptureProducer,
    device_name: Option<&str>,
) -> anyhow::Result<CaptureStream> {
    let device = resolve_device(device_name)?;
    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());

    let default_config = device.default_input_config()?;
    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();
    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    info!(
        device = %dev_name,
        native_rate,
        channels,
        "Opening input device (resampling to {} Hz mono)",
        SAMPLE_RATE
    );

    let needs_resample = native_rate != SAMPLE_RATE;
    let needs_downmix = channels > 1;
    let (error_tx, error_rx) = mpsc::unbounded_channel();
    let cb_error_tx = error_tx.clone();

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _info: &cpal::InputCallbackInfo| {
            let mono = if needs_downmix {
                to_mono(data, channels)
            } else {
                data.to_vec()
            };
            let resampled = if needs_resample {
                resample_linear(&mono, native_rate, SAMPLE_RATE)
            } else {
                mono
            };
            let written = producer.push(&resampled);
            if written < resampled.len() {
                // Buffer full: oldest audio is lost, consumer catches up.
                warn!(
                    dropped = resampled.len() - written,
                    "Capture ring buffer full"
                );
            }
        },
        move |err| {
            let _ = cb_error_tx.send(format!("Audio input stream error: {err}"));
        },
        None,
    )?;

    stream.play()?;
    info!("Audio capture started");

    Ok(CaptureStream {
        _stream: stream,
        error_rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_identity() {
        let input = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(resample_linear(&input, 16_000, 16_000), input);
    }

    #[test]
    fn test_resample_halves_length() {
        let input: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let out = resample_linear(&input, 32_000, 16_000);
        assert_eq!(out.len(), 50);
        // Linear interpolation preserves a monotone ramp
        for pair in out.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn test_to_mono_averages_channels() {
        // Interleaved stereo: L=1.0, R=0.0
        let stereo = vec![1.0, 0.0, 1.0, 0.0];
        assert_eq!(to_mono(&stereo, 2), vec![0.5, 0.5]);
        // Mono passes through
        assert_eq!(to_mono(&[0.3, 0.4], 1), vec![0.3, 0.4]);
    }
}
