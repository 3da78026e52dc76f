//! Reply generation stage.
//!
//! A dedicated worker thread that blocks on the command queue, asks the
//! language model for a short reply, and then speaks it inline through the
//! speech stage. Each command is an independent turn; there is no
//! conversational history.

#[cfg(feature = "engines")]
pub mod llama;

#[cfg(feature = "engines")]
pub use llama::LlamaChatter;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::queue::HandoffQueue;
use crate::speech::SpeechStage;
use crate::state::{PipelineEvent, StateMachine};
use crate::text::{self, BLANK_AUDIO};

/// Reply stage marker when the model fails mid-decode. The turn still
/// proceeds through `ReplyReady`/`TtsDone` so the pipeline never stalls.
const DECODE_FAILED: &str = "(decode failed)";

/// Command text to reply text.
///
/// `&mut self` because inference engines are stateful; all access is
/// additionally serialized through [`ChatterHandle`]'s mutex, since the
/// engine itself is not thread-safe.
pub trait Chatter: Send + 'static {
    fn reply(&mut self, command: &str) -> Result<String>;
}

/// Thread-safe reference-counted handle to any [`Chatter`] implementor.
#[derive(Clone)]
pub struct ChatterHandle(pub Arc<Mutex<dyn Chatter>>);

impl ChatterHandle {
    pub fn new<C: Chatter>(chatter: C) -> Self {
        Self(Arc::new(Mutex::new(chatter)))
    }
}

impl std::fmt::Debug for ChatterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatterHandle").finish_non_exhaustive()
    }
}

/// Everything the reply worker needs.
pub struct BrainContext {
    pub chatter: ChatterHandle,
    pub speech: SpeechStage,
    pub machine: Arc<StateMachine>,
    pub commands: Arc<HandoffQueue<String>>,
}

/// Run the reply worker until the command queue closes, then shut the
/// speech stage down.
pub fn run(mut ctx: BrainContext) {
    info!("brain worker started");

    while let Some(command) = ctx.commands.recv() {
        let command = command.trim().to_string();
        if command.is_empty() || command == BLANK_AUDIO {
            continue;
        }

        let started = Instant::now();
        let reply = {
            let mut chatter = ctx.chatter.0.lock();
            chatter.reply(&command)
        };
        let reply = match reply {
            Ok(text) => text,
            Err(e) => {
                warn!("reply generation failed: {e}");
                DECODE_FAILED.to_string()
            }
        };

        let reply = text::strip_reply_markers(&reply);
        info!(llm_ms = started.elapsed().as_millis() as u64, "reply generated");

        if reply.is_empty() {
            ctx.machine.dispatch(PipelineEvent::NoCommand, "empty reply");
            continue;
        }

        ctx.machine.dispatch(PipelineEvent::ReplyReady, "");
        text::print_reply(&reply);

        ctx.speech.speak_reply(&reply);
        ctx.machine.dispatch(PipelineEvent::TtsDone, "");
    }

    ctx.speech.shutdown();
    info!("brain worker stopped");
}
