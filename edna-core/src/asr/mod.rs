//! Speech recognition stage.
//!
//! A dedicated worker thread that blocks on the utterance queue, runs the
//! transcriber, filters out non-commands, and hands stripped commands to
//! the brain stage. Recognition failures never fault the pipeline; they
//! are reported as `NoCommand` so the state machine returns to waiting.

#[cfg(feature = "engines")]
pub mod whisper;

#[cfg(feature = "engines")]
pub use whisper::WhisperTranscriber;

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::queue::HandoffQueue;
use crate::segmenter::Utterance;
use crate::state::{PipelineEvent, StateMachine};
use crate::text::{self, BLANK_AUDIO};
use crate::error::Result;

/// Speech-to-text contract.
///
/// `&mut self` because decoders are stateful. Returns the trimmed
/// transcript; implementations map the blank-audio sentinel to an empty
/// string. A hard failure is an `Err`, which the stage treats as blank.
pub trait Transcriber: Send + 'static {
    fn transcribe(&mut self, utterance: &Utterance) -> Result<String>;
}

/// Everything the recognition worker needs.
pub struct AsrContext {
    pub transcriber: Box<dyn Transcriber>,
    pub machine: Arc<StateMachine>,
    pub utterances: Arc<HandoffQueue<Utterance>>,
    pub commands: Arc<HandoffQueue<String>>,
}

/// Run the recognition worker until the utterance queue closes.
pub fn run(mut ctx: AsrContext) {
    info!("recognition worker started");

    while let Some(utterance) = ctx.utterances.recv() {
        let secs = utterance.duration_ms() as f32 / 1000.0;
        let started = Instant::now();

        let raw = match ctx.transcriber.transcribe(&utterance) {
            Ok(text) => text,
            Err(e) => {
                warn!("transcription failed: {e}");
                String::new()
            }
        };

        let mut transcript = raw.trim().to_string();
        if transcript == BLANK_AUDIO {
            transcript.clear();
        }

        info!(
            asr_ms = started.elapsed().as_millis() as u64,
            secs,
            transcript = %transcript,
            "transcription done"
        );

        if transcript.chars().count() < 2 {
            ctx.machine.dispatch(PipelineEvent::NoCommand, "blank audio");
            continue;
        }

        let command = match text::strip_invocation(&transcript) {
            None => {
                ctx.machine
                    .dispatch(PipelineEvent::NoCommand, "ignored transcript");
                continue;
            }
            Some(cmd) if cmd.is_empty() => {
                ctx.machine
                    .dispatch(PipelineEvent::NoCommand, "invocation only");
                continue;
            }
            Some(cmd) => cmd,
        };

        text::print_transcript(&transcript);
        ctx.machine.dispatch(PipelineEvent::TranscriptReady, "");
        ctx.commands.push(command);
    }

    info!("recognition worker stopped");
}
