//! Speech output stage.
//!
//! Runs inline on the brain worker after a reply is produced: the reply is
//! split into sentence chunks, each chunk is synthesized to a WAV file and
//! played through the loudspeaker binary. Failures are logged and the turn
//! continues; a dead synthesis worker disables audio output for the rest
//! of the process (replies are still printed).

pub mod worker;

pub use worker::SynthWorker;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::SpeechConfig;
use crate::error::{EdnaError, Result};
use crate::text::split_sentences;

/// Text to WAV file.
///
/// A per-chunk failure (`Err` with `is_enabled()` still true) skips one
/// chunk; a worker-fatal failure flips `is_enabled()` and silences the
/// stage permanently.
pub trait Synthesizer: Send + 'static {
    fn synthesize(&mut self, text: &str) -> Result<PathBuf>;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Release any long-lived resources (child process, pipes).
    fn shutdown(&mut self) {}
}

/// WAV file to the loudspeaker, blocking until playback completes.
pub trait WavPlayer: Send + 'static {
    fn play(&mut self, wav: &Path) -> Result<()>;
}

/// Sentence-chunked synthesis and playback.
pub struct SpeechStage {
    synthesizer: Box<dyn Synthesizer>,
    player: Box<dyn WavPlayer>,
    enabled: bool,
}

impl SpeechStage {
    pub fn new(synthesizer: Box<dyn Synthesizer>, player: Box<dyn WavPlayer>) -> Self {
        Self {
            synthesizer,
            player,
            enabled: true,
        }
    }

    /// Whether audio output is still attempted.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Synthesize and play one reply, chunk by chunk.
    ///
    /// Every chunk is attempted; failed chunks are skipped. The caller owns
    /// the `TtsDone` dispatch and must send it regardless of the outcome.
    pub fn speak_reply(&mut self, reply: &str) {
        if !self.enabled {
            return;
        }

        let started = Instant::now();
        let mut failed = 0usize;
        let chunks = split_sentences(reply);

        for chunk in &chunks {
            let wav = match self.synthesizer.synthesize(chunk) {
                Ok(path) => path,
                Err(e) => {
                    failed += 1;
                    warn!("synthesis failed: {e}");
                    if !self.synthesizer.is_enabled() {
                        warn!("synthesis worker gone; replies will be text-only from now on");
                        self.enabled = false;
                        return;
                    }
                    continue;
                }
            };

            if let Err(e) = self.player.play(&wav) {
                failed += 1;
                warn!("playback failed: {e}");
            }
        }

        info!(
            tts_ms = started.elapsed().as_millis() as u64,
            chunks = chunks.len(),
            failed,
            "speech done"
        );
    }

    pub fn shutdown(&mut self) {
        self.synthesizer.shutdown();
    }
}

/// Plays WAV files by spawning the configured playback binary
/// (`<bin> -D <device> [extra args] <wav>`) and waiting for it to exit.
pub struct CommandPlayer {
    bin: String,
    device: String,
    extra_args: Vec<String>,
}

impl CommandPlayer {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            bin: config.playback_bin.clone(),
            device: config.playback_device.clone(),
            extra_args: config.playback_extra_args.clone(),
        }
    }
}

impl WavPlayer for CommandPlayer {
    fn play(&mut self, wav: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.bin);
        if !self.device.is_empty() {
            cmd.arg("-D").arg(&self.device);
        }
        cmd.args(&self.extra_args);
        cmd.arg(wav);

        let status = cmd
            .status()
            .map_err(|e| EdnaError::Playback(format!("failed to spawn {}: {e}", self.bin)))?;

        if !status.success() {
            return Err(EdnaError::Playback(format!(
                "{} exited with {status}",
                self.bin
            )));
        }
        Ok(())
    }
}
