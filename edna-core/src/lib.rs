//! # edna-core
//!
//! Pipeline engine for a fully local, interactive voice assistant.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → cpal callback → SPSC ring → capture loop (main thread)
//!                                              │  VAD + segmenter
//!                                              │  mic gate: Speaking + cooldown
//!                                    utterance queue (capacity 1, newest wins)
//!                                              │
//!                                    ASR worker → invocation stripping
//!                                              │
//!                                        command queue (FIFO)
//!                                              │
//!                                    brain worker → sentence splitter
//!                                              │
//!                                    synthesis worker child → aplay child
//! ```
//!
//! Every stage reports its outcome to the [`state::StateMachine`], which the
//! capture loop reads to gate the microphone: the assistant must never
//! hear its own voice. The four neural engines (VAD, recognizer, language
//! model, synthesizer) sit behind capability traits with scripted stubs
//! for the test suite.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod asr;
pub mod audio;
pub mod brain;
pub mod buffering;
pub mod config;
pub mod engine;
pub mod error;
pub mod queue;
pub mod segmenter;
pub mod speech;
pub mod state;
pub mod text;
pub mod vad;

// Convenience re-exports for the application crate and tests.
pub use asr::Transcriber;
pub use audio::{AudioCapture, FrameSource, MicFrameSource};
pub use brain::{Chatter, ChatterHandle};
pub use buffering::create_audio_ring;
pub use config::{AsrConfig, BrainConfig, EdnaConfig, EngineConfig, SpeechConfig};
pub use engine::{EdnaEngine, EngineParts};
pub use error::{EdnaError, Result};
pub use segmenter::Utterance;
pub use speech::{CommandPlayer, SpeechStage, SynthWorker, Synthesizer, WavPlayer};
pub use state::{PipelineEvent, PipelineState, StateMachine};
pub use vad::{VadDetector, WebRtcVad};

#[cfg(feature = "engines")]
pub use asr::WhisperTranscriber;

#[cfg(feature = "engines")]
pub use brain::LlamaChatter;
