//! Lock-free SPSC ring buffers for audio samples.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice`
//! safe to call from the real-time audio callbacks. The same primitive backs
//! three boundaries: microphone callback → capture emitter, playback control
//! thread → output callback, and output callback → level meter thread.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Type alias for the producer half of an audio ring.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half of an audio ring.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 2^20 = 1 048 576 f32 samples ≈ 21.8 s at 48 kHz.
/// Enough to ride out a stalled emission task without dropping frames.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 20;

/// Playback ring capacity: 2^19 samples ≈ 21.8 s at 24 kHz.
pub const PLAYBACK_RING_CAPACITY: usize = 1 << 19;

/// Meter tap ring capacity: the meter thread drains aggressively, so a much
/// smaller ring suffices; overflow only costs stale volume readings.
pub const METER_RING_CAPACITY: usize = 1 << 15;

/// Create a matched producer/consumer pair backed by a heap-allocated ring.
///
/// # Panics
/// Never panics — `HeapRb` construction cannot fail for reasonable capacities.
pub fn create_ring(capacity: usize) -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(capacity).split()
}

/// Ring sized for microphone capture at the device rate.
pub fn create_capture_ring() -> (AudioProducer, AudioConsumer) {
    create_ring(CAPTURE_RING_CAPACITY)
}

/// Ring sized for 24 kHz playback output.
pub fn create_playback_ring() -> (AudioProducer, AudioConsumer) {
    create_ring(PLAYBACK_RING_CAPACITY)
}

/// Ring feeding the level meter analysis thread.
pub fn create_meter_ring() -> (AudioProducer, AudioConsumer) {
    create_ring(METER_RING_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_preserves_order() {
        let (mut producer, mut consumer) = create_ring(16);
        let written = producer.push_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(written, 3);

        let mut out = [0.0f32; 3];
        let read = consumer.pop_slice(&mut out);
        assert_eq!(read, 3);
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn full_ring_reports_partial_write() {
        let (mut producer, _consumer) = create_ring(4);
        let written = producer.push_slice(&[0.0; 8]);
        assert_eq!(written, 4);
    }
}
