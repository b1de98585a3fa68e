//! Microphone capture and the lock-free sample buffer between the capture
//! callback and the session driver.

pub mod capture;
pub mod ring_buffer;

pub use capture::{list_input_devices, list_output_devices, start_capture, CaptureStream};
pub use ring_buffer::{capture_ring_buffer, CaptureConsumer, CaptureProducer};

/// Sample rate the whole pipeline operates at (16 kHz mono).
pub const SAMPLE_RATE: u32 = 16_000;

/// Frame size in samples (80 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = 1280;
