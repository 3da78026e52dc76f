//! Utterance segmentation with hysteresis and pre-roll.
//!
//! Consumes one VAD decision per 20 ms frame and accumulates utterances:
//! a run of voiced frames opens speech (seeded with the pre-roll so the
//! first phoneme is not clipped), a longer run of unvoiced frames closes
//! it. Closing hands the utterance to the caller; too-short utterances are
//! dropped there, over-long ones are force-finalized here.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::config::EngineConfig;

/// One contiguous span of detected speech plus its pre-roll.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Mono S16LE samples.
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl Utterance {
    pub fn duration_ms(&self) -> u32 {
        (self.samples.len() as u64 * 1000 / self.sample_rate.max(1) as u64) as u32
    }
}

/// What a frame did to the segmenter.
#[derive(Debug)]
pub enum SegmentEvent {
    /// Nothing changed.
    None,
    /// The start trigger fired; an utterance is now accumulating.
    SpeechStart,
    /// The stop trigger (or the length cap) fired. `utterance` is `None`
    /// when the span was shorter than the configured minimum.
    SpeechEnd { utterance: Option<Utterance> },
}

/// Frame-by-frame utterance accumulator.
pub struct UtteranceSegmenter {
    sample_rate: u32,
    start_trigger: u32,
    stop_trigger: u32,
    max_preroll_samples: usize,
    min_samples: usize,
    max_samples: usize,

    preroll: VecDeque<i16>,
    utterance: Vec<i16>,
    in_speech: bool,
    voiced_run: u32,
    unvoiced_run: u32,
}

impl UtteranceSegmenter {
    pub fn new(config: &EngineConfig) -> Self {
        let frame_samples = config.frame_samples();
        let per_ms = config.sample_rate as usize / 1000;
        Self {
            sample_rate: config.sample_rate,
            start_trigger: config.start_trigger_frames,
            stop_trigger: config.stop_trigger_frames,
            max_preroll_samples: config.preroll_frames as usize * frame_samples,
            min_samples: config.min_utterance_ms as usize * per_ms,
            max_samples: config.max_utterance_ms as usize * per_ms,
            preroll: VecDeque::with_capacity((config.preroll_frames as usize + 1) * frame_samples),
            utterance: Vec::new(),
            in_speech: false,
            voiced_run: 0,
            unvoiced_run: 0,
        }
    }

    /// Whether an utterance is currently being accumulated.
    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Feed one frame and its VAD decision.
    pub fn push_frame(&mut self, frame: &[i16], voiced: bool) -> SegmentEvent {
        // The pre-roll ring always tracks the most recent audio, so the
        // triggering frames themselves end up in the seeded utterance.
        self.preroll.extend(frame.iter().copied());
        while self.preroll.len() > self.max_preroll_samples {
            let _ = self.preroll.pop_front();
        }

        if !self.in_speech {
            if voiced {
                self.voiced_run += 1;
            } else {
                self.voiced_run = 0;
            }

            if self.voiced_run >= self.start_trigger {
                self.in_speech = true;
                self.voiced_run = 0;
                self.unvoiced_run = 0;

                self.utterance.clear();
                self.utterance.extend(self.preroll.iter().copied());

                debug!(seed_samples = self.utterance.len(), "speech start");
                return SegmentEvent::SpeechStart;
            }
            return SegmentEvent::None;
        }

        self.utterance.extend_from_slice(frame);

        if voiced {
            self.unvoiced_run = 0;
        } else {
            self.unvoiced_run += 1;
        }

        if self.unvoiced_run >= self.stop_trigger {
            return self.finalize();
        }

        if self.utterance.len() >= self.max_samples {
            warn!(
                samples = self.utterance.len(),
                "utterance length cap reached, forcing finalize"
            );
            return self.finalize();
        }

        SegmentEvent::None
    }

    fn finalize(&mut self) -> SegmentEvent {
        self.in_speech = false;
        self.voiced_run = 0;
        self.unvoiced_run = 0;

        let samples = std::mem::take(&mut self.utterance);
        let utterance = if samples.len() >= self.min_samples {
            Some(Utterance {
                samples,
                sample_rate: self.sample_rate,
            })
        } else {
            debug!(samples = samples.len(), "utterance below minimum, dropped");
            None
        };

        SegmentEvent::SpeechEnd { utterance }
    }

    /// Clear every accumulator: in-speech flag, runs, utterance, pre-roll.
    pub fn reset(&mut self) {
        self.preroll.clear();
        self.utterance.clear();
        self.in_speech = false;
        self.voiced_run = 0;
        self.unvoiced_run = 0;
    }
}
