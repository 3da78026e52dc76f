//! End-to-end pipeline scenarios with scripted engines.
//!
//! Every neural capability is replaced by a deterministic stub and the
//! whole engine (capture loop + both workers) runs to completion on real
//! threads. Assertions check the recorded transition sequence, the queue
//! discipline, and the playback invocations.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use edna_core::{
    Chatter, ChatterHandle, EdnaEngine, EngineConfig, EngineParts, FrameSource, PipelineEvent,
    PipelineState, Result, SpeechStage, Synthesizer, Transcriber, Utterance, VadDetector,
    WavPlayer,
};

const FRAME: usize = 320;

/// Plays back a fixed frame list, then reports a clean end of stream.
struct ScriptedFrames {
    frames: Vec<Vec<i16>>,
    next: usize,
}

impl ScriptedFrames {
    /// `silence` frames, then `voiced` frames, then `trailing` silence.
    fn phrase(silence: usize, voiced: usize, trailing: usize) -> Self {
        let mut frames = vec![vec![0i16; FRAME]; silence];
        frames.extend(vec![vec![2000i16; FRAME]; voiced]);
        frames.extend(vec![vec![0i16; FRAME]; trailing]);
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

/// Deterministic VAD: a frame is voiced when its first sample is non-zero.
struct AmplitudeVad;

impl VadDetector for AmplitudeVad {
    fn is_voiced(&mut self, frame: &[i16]) -> Result<bool> {
        Ok(frame.first().copied().unwrap_or(0) != 0)
    }

    fn reset(&mut self) {}
}

/// Returns a fixed transcript and records what it was asked to transcribe.
struct ScriptedTranscriber {
    transcript: &'static str,
    seen_ms: Arc<Mutex<Vec<u32>>>,
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&mut self, utterance: &Utterance) -> Result<String> {
        self.seen_ms.lock().push(utterance.duration_ms());
        Ok(self.transcript.to_string())
    }
}

/// Returns a fixed reply and records the commands it received.
struct ScriptedChatter {
    reply: &'static str,
    commands: Arc<Mutex<Vec<String>>>,
}

impl Chatter for ScriptedChatter {
    fn reply(&mut self, command: &str) -> Result<String> {
        self.commands.lock().push(command.to_string());
        Ok(self.reply.to_string())
    }
}

/// Writes one (empty) WAV file per request.
struct FileSynth {
    dir: PathBuf,
    count: usize,
}

impl Synthesizer for FileSynth {
    fn synthesize(&mut self, _text: &str) -> Result<PathBuf> {
        self.count += 1;
        let path = self
            .dir
            .join(format!("edna_test_{}_{}.wav", std::process::id(), self.count));
        std::fs::write(&path, b"RIFF")?;
        Ok(path)
    }
}

struct CountingPlayer {
    plays: Arc<AtomicUsize>,
}

impl WavPlayer for CountingPlayer {
    fn play(&mut self, wav: &Path) -> Result<()> {
        assert!(wav.exists(), "player got a path the synthesizer never wrote");
        self.plays.fetch_add(1, Ordering::SeqCst);
        let _ = std::fs::remove_file(wav);
        Ok(())
    }
}

/// Everything a scenario run produces.
struct RunOutcome {
    transitions: Vec<(PipelineState, PipelineState, PipelineEvent)>,
    final_state: PipelineState,
    asr_seen_ms: Vec<u32>,
    commands: Vec<String>,
    plays: usize,
}

impl RunOutcome {
    fn events(&self) -> Vec<PipelineEvent> {
        self.transitions.iter().map(|t| t.2).collect()
    }
}

fn run_scenario(
    frames: ScriptedFrames,
    transcript: &'static str,
    reply: &'static str,
) -> RunOutcome {
    let seen_ms = Arc::new(Mutex::new(Vec::new()));
    let commands = Arc::new(Mutex::new(Vec::new()));
    let plays = Arc::new(AtomicUsize::new(0));

    let engine = EdnaEngine::new(EngineConfig::default());

    let transitions: Arc<Mutex<Vec<(PipelineState, PipelineState, PipelineEvent)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&transitions);
    engine
        .machine()
        .set_observer(Arc::new(move |from, to, event, _note| {
            recorder.lock().push((from, to, event));
        }));

    let parts = EngineParts {
        frames: Box::new(frames),
        vad: Box::new(AmplitudeVad),
        transcriber: Box::new(ScriptedTranscriber {
            transcript,
            seen_ms: Arc::clone(&seen_ms),
        }),
        chatter: ChatterHandle::new(ScriptedChatter {
            reply,
            commands: Arc::clone(&commands),
        }),
        speech: SpeechStage::new(
            Box::new(FileSynth {
                dir: std::env::temp_dir(),
                count: 0,
            }),
            Box::new(CountingPlayer {
                plays: Arc::clone(&plays),
            }),
        ),
    };

    engine.run(parts).expect("pipeline run failed");

    let final_state = engine.machine().state();
    let transitions = transitions.lock().clone();
    let asr_seen_ms = seen_ms.lock().clone();
    let commands = commands.lock().clone();
    RunOutcome {
        transitions,
        final_state,
        asr_seen_ms,
        commands,
        plays: plays.load(Ordering::SeqCst),
    }
}

#[test]
fn pure_silence_produces_nothing() {
    let outcome = run_scenario(ScriptedFrames::phrase(250, 0, 0), "unused", "unused");

    assert_eq!(outcome.events(), vec![PipelineEvent::Start]);
    assert_eq!(outcome.final_state, PipelineState::AwaitSpeech);
    assert!(outcome.asr_seen_ms.is_empty(), "no transcripts expected");
    assert!(outcome.commands.is_empty());
    assert_eq!(outcome.plays, 0);
}

#[test]
fn brief_pop_stays_below_the_start_trigger() {
    let outcome = run_scenario(ScriptedFrames::phrase(10, 2, 20), "unused", "unused");

    assert_eq!(outcome.events(), vec![PipelineEvent::Start]);
    assert!(outcome.asr_seen_ms.is_empty());
}

#[test]
fn short_phrase_is_segmented_once_with_preroll() {
    // 300 ms silence, 500 ms voiced, 500 ms silence. The transcript is
    // blank, so the turn ends with NoCommand.
    let outcome = run_scenario(ScriptedFrames::phrase(15, 25, 25), "", "unused");

    assert_eq!(
        outcome.events(),
        vec![
            PipelineEvent::Start,
            PipelineEvent::SpeechStart,
            PipelineEvent::SpeechEndQueued,
            PipelineEvent::NoCommand,
        ]
    );
    assert_eq!(outcome.final_state, PipelineState::AwaitSpeech);

    // Voice span + pre-roll + stop-trigger tail.
    assert_eq!(outcome.asr_seen_ms.len(), 1);
    let ms = outcome.asr_seen_ms[0];
    assert!((1140..=1220).contains(&ms), "utterance duration {ms} ms");
}

#[test]
fn non_invocation_transcript_is_ignored() {
    let outcome = run_scenario(
        ScriptedFrames::phrase(15, 25, 25),
        "What time is it",
        "unused",
    );

    assert_eq!(
        outcome.events(),
        vec![
            PipelineEvent::Start,
            PipelineEvent::SpeechStart,
            PipelineEvent::SpeechEndQueued,
            PipelineEvent::NoCommand,
        ]
    );
    assert_eq!(outcome.final_state, PipelineState::AwaitSpeech);
    assert!(outcome.commands.is_empty(), "no command may reach the brain");
    assert_eq!(outcome.plays, 0);
}

#[test]
fn invocation_without_command_is_dropped() {
    let outcome = run_scenario(ScriptedFrames::phrase(15, 25, 25), "Hey Edna.", "unused");

    assert_eq!(
        outcome.events(),
        vec![
            PipelineEvent::Start,
            PipelineEvent::SpeechStart,
            PipelineEvent::SpeechEndQueued,
            PipelineEvent::NoCommand,
        ]
    );
    assert!(outcome.commands.is_empty());
}

#[test]
fn full_turn_speaks_two_sentences() {
    let outcome = run_scenario(
        ScriptedFrames::phrase(15, 25, 25),
        "Edna what is the sky color",
        "The sky is blue. Usually.",
    );

    assert_eq!(
        outcome.events(),
        vec![
            PipelineEvent::Start,
            PipelineEvent::SpeechStart,
            PipelineEvent::SpeechEndQueued,
            PipelineEvent::TranscriptReady,
            PipelineEvent::ReplyReady,
            PipelineEvent::TtsDone,
        ]
    );

    // Boot → AwaitSpeech → CapturingSpeech → Transcribing → Thinking →
    // Speaking → AwaitSpeech, with no detours.
    let states: Vec<PipelineState> = std::iter::once(outcome.transitions[0].0)
        .chain(outcome.transitions.iter().map(|t| t.1))
        .collect();
    assert_eq!(
        states,
        vec![
            PipelineState::Boot,
            PipelineState::AwaitSpeech,
            PipelineState::CapturingSpeech,
            PipelineState::Transcribing,
            PipelineState::Thinking,
            PipelineState::Speaking,
            PipelineState::AwaitSpeech,
        ]
    );

    assert_eq!(outcome.commands, vec!["what is the sky color".to_string()]);
    assert_eq!(outcome.plays, 2, "one playback per sentence");
    assert_eq!(
        outcome
            .events()
            .iter()
            .filter(|e| **e == PipelineEvent::TtsDone)
            .count(),
        1
    );
}

#[test]
fn decode_failure_still_completes_the_turn() {
    struct FailingChatter;
    impl Chatter for FailingChatter {
        fn reply(&mut self, _command: &str) -> Result<String> {
            Err(edna_core::EdnaError::Brain("scripted".into()))
        }
    }

    let plays = Arc::new(AtomicUsize::new(0));
    let engine = EdnaEngine::new(EngineConfig::default());

    let transitions: Arc<Mutex<Vec<PipelineEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&transitions);
    engine
        .machine()
        .set_observer(Arc::new(move |_f, _t, event, _n| {
            recorder.lock().push(event);
        }));

    let parts = EngineParts {
        frames: Box::new(ScriptedFrames::phrase(15, 25, 25)),
        vad: Box::new(AmplitudeVad),
        transcriber: Box::new(ScriptedTranscriber {
            transcript: "edna break please",
            seen_ms: Arc::new(Mutex::new(Vec::new())),
        }),
        chatter: ChatterHandle::new(FailingChatter),
        speech: SpeechStage::new(
            Box::new(FileSynth {
                dir: std::env::temp_dir(),
                count: 0,
            }),
            Box::new(CountingPlayer {
                plays: Arc::clone(&plays),
            }),
        ),
    };

    engine.run(parts).expect("pipeline run failed");

    // The marker reply flows through ReplyReady/TtsDone, so the machine
    // lands back in AwaitSpeech and never deadlocks.
    let events = transitions.lock().clone();
    assert!(events.contains(&PipelineEvent::ReplyReady));
    assert!(events.contains(&PipelineEvent::TtsDone));
    assert_eq!(engine.machine().state(), PipelineState::AwaitSpeech);
    assert_eq!(plays.load(Ordering::SeqCst), 1, "the marker is spoken");
}

#[test]
fn running_flag_stops_the_pipeline() {
    /// Endless silence, until the flag is observed cleared.
    struct EndlessSilence {
        running: Arc<AtomicBool>,
        reads: usize,
    }
    impl FrameSource for EndlessSilence {
        fn read_frame(&mut self, frame: &mut [i16]) -> Result<bool> {
            self.reads += 1;
            if self.reads == 50 {
                // Simulate SIGINT mid-stream.
                self.running.store(false, Ordering::SeqCst);
            }
            frame.fill(0);
            Ok(true)
        }
    }

    let engine = EdnaEngine::new(EngineConfig::default());
    let running = engine.running();

    let parts = EngineParts {
        frames: Box::new(EndlessSilence { running, reads: 0 }),
        vad: Box::new(AmplitudeVad),
        transcriber: Box::new(ScriptedTranscriber {
            transcript: "",
            seen_ms: Arc::new(Mutex::new(Vec::new())),
        }),
        chatter: ChatterHandle::new(ScriptedChatter {
            reply: "",
            commands: Arc::new(Mutex::new(Vec::new())),
        }),
        speech: SpeechStage::new(
            Box::new(FileSynth {
                dir: std::env::temp_dir(),
                count: 0,
            }),
            Box::new(CountingPlayer {
                plays: Arc::new(AtomicUsize::new(0)),
            }),
        ),
    };

    engine.run(parts).expect("pipeline run failed");
    assert_eq!(engine.machine().state(), PipelineState::AwaitSpeech);
}
