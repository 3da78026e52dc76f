//! Audio capture loop.
//!
//! Runs on the main thread. Per 20 ms frame:
//!
//! ```text
//! 1. Blocking frame read (one recovery attempt, then fatal)
//! 2. Mic gate: while Speaking or cooling down, discard the frame,
//!    reset the segmenter, clear the utterance queue
//! 3. Arm the cooldown on the Speaking -> non-Speaking edge
//! 4. VAD classify (engine failure is fatal)
//! 5. Segmenter: SpeechStart / SpeechEnd dispatch, newest-wins enqueue
//! ```
//!
//! The gate covers only `Speaking` and the cooldown tail. Speech that
//! begins while the pipeline is transcribing or thinking is still
//! segmented; its `SpeechStart` is a no-op in those states and the
//! newest-wins queue keeps only the latest utterance for the next turn.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{debug, info, warn};

use crate::audio::FrameSource;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::queue::HandoffQueue;
use crate::segmenter::{SegmentEvent, Utterance, UtteranceSegmenter};
use crate::state::{PipelineEvent, PipelineState, StateMachine};
use crate::vad::VadDetector;

/// All context the capture loop needs, passed as one struct.
pub struct CaptureContext {
    pub config: EngineConfig,
    pub frames: Box<dyn FrameSource>,
    pub vad: Box<dyn VadDetector>,
    pub machine: Arc<StateMachine>,
    pub utterances: Arc<HandoffQueue<Utterance>>,
    pub running: Arc<AtomicBool>,
}

/// Run the capture loop until the running flag clears, the frame source
/// ends, or a fatal audio/VAD error occurs.
pub fn run(mut ctx: CaptureContext) -> Result<()> {
    let mut frame = vec![0i16; ctx.config.frame_samples()];
    let mut segmenter = UtteranceSegmenter::new(&ctx.config);

    let cooldown_frames = ctx.config.cooldown_frames();
    let mut cooldown = 0u32;
    let mut last_was_speaking = false;
    let mut gated = false;

    info!("listening (Ctrl-C to stop)");

    while ctx.running.load(Ordering::Relaxed) {
        match ctx.frames.read_frame(&mut frame) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                warn!("frame read failed: {e}; attempting recovery");
                ctx.frames.recover()?;
                continue;
            }
        }

        let speaking_now = ctx.machine.state() == PipelineState::Speaking;

        // Leaving Speaking arms the cooldown: the speaker tail can still
        // be in the room after the playback process returns.
        if last_was_speaking && !speaking_now {
            cooldown = cooldown_frames;
            debug!(cooldown_frames, "playback ended, cooldown armed");
        }
        last_was_speaking = speaking_now;

        if speaking_now || cooldown > 0 {
            if cooldown > 0 {
                cooldown -= 1;
            }
            if !gated {
                segmenter.reset();
                ctx.vad.reset();
                gated = true;
            }
            // Drop anything queued so a stale utterance cannot catch up
            // once the gate lifts.
            ctx.utterances.clear();
            continue;
        }
        gated = false;

        let voiced = ctx.vad.is_voiced(&frame)?;

        match segmenter.push_frame(&frame, voiced) {
            SegmentEvent::None => {}
            SegmentEvent::SpeechStart => {
                info!("speech start");
                ctx.machine
                    .dispatch(PipelineEvent::SpeechStart, "start trigger");
            }
            SegmentEvent::SpeechEnd { utterance } => {
                info!("speech end, queued");
                ctx.machine
                    .dispatch(PipelineEvent::SpeechEndQueued, "stop trigger");
                if let Some(utterance) = utterance {
                    debug!(duration_ms = utterance.duration_ms(), "utterance queued");
                    ctx.utterances.replace(utterance);
                }
            }
        }
    }

    info!("capture loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EdnaError;
    use parking_lot::Mutex;

    /// Plays back a fixed list of frames, then reports a clean end.
    struct ScriptedFrames {
        frames: Vec<Vec<i16>>,
        next: usize,
    }

    impl ScriptedFrames {
        fn new(frames: Vec<Vec<i16>>) -> Self {
            Self { frames, next: 0 }
        }
    }

    impl FrameSource for ScriptedFrames {
        fn read_frame(&mut self, frame: &mut [i16]) -> Result<bool> {
            match self.frames.get(self.next) {
                Some(data) => {
                    frame.copy_from_slice(data);
                    self.next += 1;
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    /// Voiced when the first sample is non-zero.
    struct AmplitudeVad;

    impl VadDetector for AmplitudeVad {
        fn is_voiced(&mut self, frame: &[i16]) -> Result<bool> {
            Ok(frame.first().copied().unwrap_or(0) != 0)
        }

        fn reset(&mut self) {}
    }

    struct FailingVad;

    impl VadDetector for FailingVad {
        fn is_voiced(&mut self, _frame: &[i16]) -> Result<bool> {
            Err(EdnaError::Vad("scripted".into()))
        }

        fn reset(&mut self) {}
    }

    fn frames(silence: usize, voiced: usize, trailing: usize) -> Vec<Vec<i16>> {
        let mut out = vec![vec![0i16; 320]; silence];
        out.extend(vec![vec![1000i16; 320]; voiced]);
        out.extend(vec![vec![0i16; 320]; trailing]);
        out
    }

    fn run_with(
        frame_list: Vec<Vec<i16>>,
        vad: Box<dyn VadDetector>,
    ) -> (Result<()>, Arc<StateMachine>, Arc<HandoffQueue<Utterance>>, Vec<PipelineEvent>) {
        let machine = Arc::new(StateMachine::new());
        let utterances = Arc::new(HandoffQueue::new());
        let events: Arc<Mutex<Vec<PipelineEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let events2 = Arc::clone(&events);
        machine.set_observer(Arc::new(move |_f, _t, ev, _n| events2.lock().push(ev)));
        machine.start();

        let result = run(CaptureContext {
            config: EngineConfig::default(),
            frames: Box::new(ScriptedFrames::new(frame_list)),
            vad,
            machine: Arc::clone(&machine),
            utterances: Arc::clone(&utterances),
            running: Arc::new(AtomicBool::new(true)),
        });

        let recorded = events.lock().clone();
        (result, machine, utterances, recorded)
    }

    #[test]
    fn silence_leaves_the_queue_empty() {
        let (result, machine, utterances, events) =
            run_with(frames(250, 0, 0), Box::new(AmplitudeVad));
        result.unwrap();
        assert!(utterances.is_empty());
        assert_eq!(machine.state(), PipelineState::AwaitSpeech);
        assert_eq!(events, vec![PipelineEvent::Start]);
    }

    #[test]
    fn short_phrase_reaches_the_queue() {
        let (result, _machine, utterances, events) =
            run_with(frames(15, 25, 25), Box::new(AmplitudeVad));
        result.unwrap();
        assert_eq!(
            events,
            vec![
                PipelineEvent::Start,
                PipelineEvent::SpeechStart,
                PipelineEvent::SpeechEndQueued,
            ]
        );
        assert_eq!(utterances.len(), 1);
        let utterance = utterances.recv().unwrap();
        let ms = utterance.duration_ms();
        assert!((1140..=1220).contains(&ms), "duration {ms} ms");
    }

    #[test]
    fn vad_failure_is_fatal() {
        let (result, _machine, _utterances, _events) =
            run_with(frames(0, 5, 0), Box::new(FailingVad));
        assert!(matches!(result, Err(EdnaError::Vad(_))));
    }

    #[test]
    fn gate_discards_audio_while_speaking() {
        let machine = Arc::new(StateMachine::new());
        machine.start();
        // Force the machine into Speaking.
        machine.dispatch(PipelineEvent::SpeechStart, "");
        machine.dispatch(PipelineEvent::SpeechEndQueued, "");
        machine.dispatch(PipelineEvent::TranscriptReady, "");
        machine.dispatch(PipelineEvent::ReplyReady, "");
        assert_eq!(machine.state(), PipelineState::Speaking);

        let utterances = Arc::new(HandoffQueue::new());
        utterances.push(Utterance {
            samples: vec![0; 3200],
            sample_rate: 16_000,
        });

        let result = run(CaptureContext {
            config: EngineConfig::default(),
            frames: Box::new(ScriptedFrames::new(frames(0, 50, 0))),
            vad: Box::new(AmplitudeVad),
            machine: Arc::clone(&machine),
            utterances: Arc::clone(&utterances),
            running: Arc::new(AtomicBool::new(true)),
        });
        result.unwrap();

        // Nothing segmented, and the stale utterance was flushed.
        assert!(utterances.is_empty());
        assert_eq!(machine.state(), PipelineState::Speaking);
    }

    #[test]
    fn cooldown_gates_after_speaking_ends() {
        let machine = Arc::new(StateMachine::new());
        machine.start();
        machine.dispatch(PipelineEvent::SpeechStart, "");
        machine.dispatch(PipelineEvent::SpeechEndQueued, "");
        machine.dispatch(PipelineEvent::TranscriptReady, "");
        machine.dispatch(PipelineEvent::ReplyReady, "");

        let utterances = Arc::new(HandoffQueue::new());

        // One gated frame while Speaking, then playback "ends" and 40
        // voiced frames follow: the 30-frame cooldown discards the first
        // 30, the remaining 10 open a new utterance but cannot finish it.
        let machine2 = Arc::clone(&machine);
        let mut fed = 0usize;
        struct CallbackFrames<F: FnMut(&mut [i16]) -> Option<()> + Send> {
            f: F,
        }
        impl<F: FnMut(&mut [i16]) -> Option<()> + Send> FrameSource for CallbackFrames<F> {
            fn read_frame(&mut self, frame: &mut [i16]) -> Result<bool> {
                Ok((self.f)(frame).is_some())
            }
        }

        let result = run(CaptureContext {
            config: EngineConfig::default(),
            frames: Box::new(CallbackFrames {
                f: move |frame: &mut [i16]| {
                    fed += 1;
                    if fed == 1 {
                        frame.fill(0);
                        Some(())
                    } else if fed == 2 {
                        // Playback finished between frames.
                        machine2.dispatch(PipelineEvent::TtsDone, "");
                        frame.fill(1000);
                        Some(())
                    } else if fed <= 41 {
                        frame.fill(1000);
                        Some(())
                    } else {
                        None
                    }
                },
            }),
            vad: Box::new(AmplitudeVad),
            machine: Arc::clone(&machine),
            utterances: Arc::clone(&utterances),
            running: Arc::new(AtomicBool::new(true)),
        });
        result.unwrap();

        // The queue stayed empty the whole time; speech opened only after
        // the cooldown expired.
        assert!(utterances.is_empty());
        assert_eq!(machine.state(), PipelineState::CapturingSpeech);
    }
}
