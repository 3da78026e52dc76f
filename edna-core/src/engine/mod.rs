//! `EdnaEngine` — top-level lifecycle controller.
//!
//! ## Threading
//!
//! ```text
//! main thread          engine.run()  → capture loop (mic + VAD gate)
//! "edna-asr" thread    asr::run()    → utterance queue consumer
//! "edna-brain" thread  brain::run()  → command queue consumer + speech
//! ```
//!
//! Shutdown: the running flag clears (SIGINT or a fatal capture error),
//! the capture loop exits, `Stop` is dispatched, both queues close, the
//! workers drain their backlog and exit, and the synthesis worker child is
//! reaped by the brain worker on its way out.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;

use tracing::{error, info};

use crate::asr::{self, AsrContext, Transcriber};
use crate::audio::FrameSource;
use crate::brain::{self, BrainContext, ChatterHandle};
use crate::config::EngineConfig;
use crate::error::{EdnaError, Result};
use crate::queue::HandoffQueue;
use crate::speech::SpeechStage;
use crate::state::{PipelineEvent, StateMachine};
use crate::vad::VadDetector;

/// The capability objects the engine drives. The application injects real
/// engines; the test suite injects scripted stubs.
pub struct EngineParts {
    pub frames: Box<dyn FrameSource>,
    pub vad: Box<dyn VadDetector>,
    pub transcriber: Box<dyn Transcriber>,
    pub chatter: ChatterHandle,
    pub speech: SpeechStage,
}

/// The pipeline coordinator.
pub struct EdnaEngine {
    config: EngineConfig,
    machine: Arc<StateMachine>,
    running: Arc<AtomicBool>,
}

impl EdnaEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            machine: Arc::new(StateMachine::new()),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The shared state machine, for observers and external state reads.
    pub fn machine(&self) -> Arc<StateMachine> {
        Arc::clone(&self.machine)
    }

    /// The process-wide running flag; clear it to stop the pipeline.
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Request shutdown from any thread.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run the pipeline on the calling thread until shutdown.
    ///
    /// Blocks for the lifetime of the assistant. Returns the capture
    /// loop's verdict after both workers have been joined.
    ///
    /// # Errors
    /// Propagates fatal capture or VAD failures; worker panics surface as
    /// `EdnaError::Other`.
    pub fn run(&self, parts: EngineParts) -> Result<()> {
        let utterances: Arc<HandoffQueue<_>> = Arc::new(HandoffQueue::new());
        let commands: Arc<HandoffQueue<String>> = Arc::new(HandoffQueue::new());

        self.machine.start();

        let asr_handle = {
            let ctx = AsrContext {
                transcriber: parts.transcriber,
                machine: Arc::clone(&self.machine),
                utterances: Arc::clone(&utterances),
                commands: Arc::clone(&commands),
            };
            thread::Builder::new()
                .name("edna-asr".into())
                .spawn(move || asr::run(ctx))?
        };

        let brain_handle = {
            let ctx = BrainContext {
                chatter: parts.chatter,
                speech: parts.speech,
                machine: Arc::clone(&self.machine),
                commands: Arc::clone(&commands),
            };
            thread::Builder::new()
                .name("edna-brain".into())
                .spawn(move || brain::run(ctx))?
        };

        let capture_result = pipeline::run(pipeline::CaptureContext {
            config: self.config.clone(),
            frames: parts.frames,
            vad: parts.vad,
            machine: Arc::clone(&self.machine),
            utterances: Arc::clone(&utterances),
            running: Arc::clone(&self.running),
        });

        info!("stopping");
        self.running.store(false, Ordering::SeqCst);
        self.machine.dispatch(
            PipelineEvent::Stop,
            if capture_result.is_ok() {
                "shutdown"
            } else {
                "capture failure"
            },
        );

        // There is no per-request cancellation: a queued utterance still
        // flows through ASR, and its command through the brain. Close and
        // join in pipeline order so in-flight turns run to completion.
        let mut worker_panic = false;
        utterances.close();
        if asr_handle.join().is_err() {
            error!("recognition worker panicked");
            worker_panic = true;
        }
        commands.close();
        if brain_handle.join().is_err() {
            error!("brain worker panicked");
            worker_panic = true;
        }

        capture_result?;
        if worker_panic {
            return Err(EdnaError::Other(anyhow::anyhow!("worker thread panicked")));
        }
        info!("stopped");
        Ok(())
    }
}
