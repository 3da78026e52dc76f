//! Microphone capture.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not allocate, block on a lock, or perform I/O. The callback
//! therefore only downmixes to mono and pushes into the lock-free SPSC
//! ring; everything else (resampling, frame cutting, VAD) happens on the
//! capture loop's thread via [`MicFrameSource`].
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms. [`AudioCapture`] must be
//! created and dropped on the same OS thread (in this pipeline, the main
//! thread, which also runs the capture loop). [`MicFrameSource`] holds only
//! the ring consumer and is freely `Send`.

pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::{
    buffering::{AudioConsumer, AudioProducer, Consumer},
    error::{EdnaError, Result},
};

use resample::RateConverter;

/// Blocking source of fixed-size PCM frames for the capture loop.
///
/// `read_frame` fills `frame` with exactly one frame of mono S16LE audio at
/// the pipeline rate and returns `Ok(true)`, or `Ok(false)` once the source
/// has shut down cleanly. A read error may be followed by one `recover`
/// attempt; a second failure is fatal to the pipeline.
pub trait FrameSource: Send {
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<bool>;

    /// One-shot recovery after a failed read. Default: nothing to do.
    fn recover(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Handle to an active cpal capture stream.
///
/// Not `Send`; keep it alive on the thread that created it for as long as
/// audio should flow.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Device sample rate actually opened (Hz).
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl AudioCapture {
    /// Open a capture device and start pushing mono f32 samples into
    /// `producer`.
    ///
    /// Device selection: exact name match on `preferred` first, then the
    /// system default input, then the first available input.
    ///
    /// # Errors
    /// `EdnaError::NoInputDevice` when nothing can capture,
    /// `EdnaError::AudioStream` when the stream cannot be built.
    pub fn open(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();

        let mut selected = None;
        if let Some(name) = preferred {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected = devices.find(|d| d.name().map(|n| n == name).unwrap_or(false));
                    if selected.is_none() {
                        warn!("capture device '{name}' not found, falling back");
                    }
                }
                Err(e) => warn!("input device enumeration failed: {e}"),
            }
        }

        let device = match selected.or_else(|| host.default_input_device()) {
            Some(d) => d,
            None => {
                let mut devices = host
                    .input_devices()
                    .map_err(|e| EdnaError::AudioDevice(e.to_string()))?;
                let first = devices.next().ok_or(EdnaError::NoInputDevice)?;
                warn!("no default input device, using first available");
                first
            }
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening capture device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| EdnaError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ch = channels as usize;
        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mut mix: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        push_mono(&mut producer, &mut mix, data, ch, |s| s);
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }
            SampleFormat::I16 => {
                let mut mix: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        push_mono(&mut producer, &mut mix, data, ch, |s| s as f32 / 32768.0);
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }
            SampleFormat::U16 => {
                let mut mix: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        push_mono(&mut producer, &mut mix, data, ch, |s| {
                            (s as f32 - 32768.0) / 32768.0
                        });
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }
            fmt => {
                return Err(EdnaError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| EdnaError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| EdnaError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }
}

/// Downmix an interleaved callback buffer to mono and push it.
///
/// `mix` is reused across callbacks so the hot path stays allocation-free
/// after the first call.
#[cfg(feature = "audio-cpal")]
fn push_mono<T: Copy>(
    producer: &mut AudioProducer,
    mix: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    to_f32: impl Fn(T) -> f32,
) {
    let frames = data.len() / channels.max(1);
    mix.resize(frames, 0.0);
    for f in 0..frames {
        let base = f * channels;
        let mut sum = 0f32;
        for c in 0..channels {
            sum += to_f32(data[base + c]);
        }
        mix[f] = sum / channels as f32;
    }
    let written = producer.push_slice(mix);
    if written < mix.len() {
        warn!("audio ring full: dropped {} frames", mix.len() - written);
    }
}

/// Stub when built without cpal.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred: Option<&str>,
    ) -> Result<Self> {
        Err(EdnaError::AudioStream(
            "compiled without the audio-cpal feature".into(),
        ))
    }
}

/// How long the frame reader sleeps when the ring is empty.
const EMPTY_SLEEP_MS: u64 = 2;

/// Cuts the capture ring into fixed 20 ms S16LE frames at the pipeline rate.
pub struct MicFrameSource {
    consumer: AudioConsumer,
    converter: RateConverter,
    pending: Vec<i16>,
    raw: Vec<f32>,
    running: Arc<AtomicBool>,
}

impl MicFrameSource {
    /// `capture_rate` is the rate [`AudioCapture`] actually opened;
    /// `target_rate` is the pipeline rate (16 kHz).
    pub fn new(
        consumer: AudioConsumer,
        running: Arc<AtomicBool>,
        capture_rate: u32,
        target_rate: u32,
    ) -> Result<Self> {
        // One device-rate 20 ms block per conversion call.
        let block = (capture_rate as usize * 20) / 1000;
        Ok(Self {
            consumer,
            converter: RateConverter::new(capture_rate, target_rate, block.max(1))?,
            pending: Vec::new(),
            raw: vec![0f32; block.max(1)],
            running,
        })
    }
}

impl FrameSource for MicFrameSource {
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<bool> {
        loop {
            if self.pending.len() >= frame.len() {
                frame.copy_from_slice(&self.pending[..frame.len()]);
                self.pending.drain(..frame.len());
                return Ok(true);
            }

            let n = self.consumer.pop_slice(&mut self.raw);
            if n == 0 {
                if !self.running.load(Ordering::Relaxed) {
                    return Ok(false);
                }
                std::thread::sleep(std::time::Duration::from_millis(EMPTY_SLEEP_MS));
                continue;
            }

            let resampled = self.converter.process(&self.raw[..n]);
            self.pending.extend(
                resampled
                    .iter()
                    .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::create_audio_ring;
    use ringbuf::traits::Producer;

    #[test]
    fn frame_source_cuts_exact_frames() {
        let (mut producer, consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));
        let mut source = MicFrameSource::new(consumer, Arc::clone(&running), 16_000, 16_000).unwrap();

        producer.push_slice(&vec![0.5f32; 800]); // 2.5 frames
        let mut frame = vec![0i16; 320];

        assert!(source.read_frame(&mut frame).unwrap());
        assert_eq!(frame[0], (0.5f32 * 32767.0) as i16);
        assert!(source.read_frame(&mut frame).unwrap());

        // Half a frame left; shut down instead of blocking forever.
        running.store(false, Ordering::Relaxed);
        assert!(!source.read_frame(&mut frame).unwrap());
    }

    #[test]
    fn clamps_out_of_range_samples() {
        let (mut producer, consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));
        let mut source = MicFrameSource::new(consumer, running, 16_000, 16_000).unwrap();

        producer.push_slice(&vec![2.0f32; 320]);
        let mut frame = vec![0i16; 320];
        assert!(source.read_frame(&mut frame).unwrap());
        assert_eq!(frame[0], 32767);
    }
}
