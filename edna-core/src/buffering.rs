//! Lock-free SPSC ring buffer between the audio callback and the capture loop.
//!
//! `ringbuf::HeapRb<f32>` provides a wait-free `push_slice` that is safe to
//! call from the real-time audio callback. The consumer half is drained on
//! the capture thread, resampled, and cut into fixed 20 ms frames.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Producer half — held by the audio callback.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half — held by the capture loop.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Ring capacity: 2^21 f32 samples ≈ 43 s at 48 kHz. Inference stalls on
/// the consumer side must never force the callback to drop audio.
pub const RING_CAPACITY: usize = 1 << 21;

/// Create a matched producer/consumer pair.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
