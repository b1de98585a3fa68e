//! Lock-free SPSC ring buffer carrying samples from the cpal callback thread
//! to the session driver without blocking the audio thread.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Capacity: ~10 seconds of 16 kHz mono audio.
const CAPACITY: usize = 160_000;

/// Producer half, owned by the capture callback.
pub struct CaptureProducer {
    inner: ringbuf::HeapProd<f32>,
}

/// Consumer half, owned by the session driver.
pub struct CaptureConsumer {
    inner: ringbuf::HeapCons<f32>,
}

/// Create a matched producer/consumer pair.
pub fn capture_ring_buffer() -> (CaptureProducer, CaptureConsumer) {
    let (prod, cons) = HeapRb::<f32>::new(CAPACITY).split();
    (
        CaptureProducer { inner: prod },
        CaptureConsumer { inner: cons },
    )
}

impl CaptureProducer {
    /// Push samples; returns how many were written. When the buffer is full
    /// the overflow is dropped and the consumer catches up later.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }
}

impl CaptureConsumer {
    /// Pop up to `buf.len()` samples into `buf`; returns how many were read.
    pub fn pop(&mut self, buf: &mut [f32]) -> usize {
        self.inner.pop_slice(buf)
    }

    /// Samples currently buffered.
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Pop everything currently buffered.
    pub fn drain(&mut self) -> Vec<f32> {
        let n = self.available();
        if n == 0 {
            return Vec::new();
        }
        let mut buf = vec![0.0f32; n];
        let read = self.pop(&mut buf);
        buf.truncate(read);
        buf
    }
}

// The ringbuf halves are each used from exactly one thread: the producer from
// the cpal audio callback, the consumer from the driver task.
unsafe impl Send for CaptureProducer {}
unsafe impl Send for CaptureConsumer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let (mut prod, mut cons) = capture_ring_buffer();
        let written = prod.push(&[1.0, 2.0, 3.0]);
        assert_eq!(written, 3);
        let mut buf = [0.0f32; 8];
        let read = cons.pop(&mut buf);
        assert_eq!(read, 3);
        assert_eq!(&buf[..3], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_drain_empties_buffer() {
        let (mut prod, mut cons) = capture_ring_buffer();
        prod.push(&[0.25; 100]);
        let drained = cons.drain();
        assert_eq!(drained.len(), 100);
        assert_eq!(cons.available(), 0);
        assert!(cons.drain().is_empty());
    }
}
