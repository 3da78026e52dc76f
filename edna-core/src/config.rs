//! Pipeline configuration.
//!
//! Every knob carries a default tuned for a near-field microphone and a
//! small instruct model on a single-GPU host. `EdnaConfig::from_env()`
//! builds the full configuration from the `EDNA_*` environment contract;
//! the application layer may override individual fields afterwards.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EdnaError, Result};

/// Relative path of the speech-recognition model under the top directory.
const ASR_MODEL_REL: &str = "third_party/whisper.cpp/models/ggml-base.en.bin";

/// Relative path of the language model under the top directory.
const LLM_MODEL_REL: &str = "models/Qwen2.5-2B-Instruct.Q6_K.gguf";

/// Capture, VAD and segmentation settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capture sample rate in Hz. The whole pipeline runs at this rate.
    pub sample_rate: u32,
    /// Frame duration in milliseconds. WebRTC VAD accepts 10/20/30 ms.
    pub frame_ms: u32,
    /// VAD aggressiveness, 0 (permissive) to 3 (aggressive).
    pub vad_mode: u8,
    /// Consecutive voiced frames required to open an utterance (60 ms).
    pub start_trigger_frames: u32,
    /// Consecutive unvoiced frames required to close an utterance (400 ms).
    pub stop_trigger_frames: u32,
    /// Pre-roll kept before speech onset, in frames (300 ms).
    pub preroll_frames: u32,
    /// Utterances shorter than this are dropped, not queued.
    pub min_utterance_ms: u32,
    /// Utterances are force-finalized at this length.
    pub max_utterance_ms: u32,
    /// Mic-gate tail after playback ends, covering speaker latency.
    pub cooldown_ms: u32,
    /// Capture device name. `None` selects the system default input.
    pub capture_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_ms: 20,
            vad_mode: 2,
            start_trigger_frames: 3,
            stop_trigger_frames: 20,
            preroll_frames: 15,
            min_utterance_ms: 200,
            max_utterance_ms: 10_000,
            cooldown_ms: 600,
            capture_device: Some("plughw:0,0".into()),
        }
    }
}

impl EngineConfig {
    /// Samples per frame (320 at 16 kHz / 20 ms).
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }

    /// Cooldown length in frames, rounded up (30 at 600 ms / 20 ms).
    pub fn cooldown_frames(&self) -> u32 {
        self.cooldown_ms.div_ceil(self.frame_ms.max(1))
    }
}

/// Speech-recognition engine settings.
#[derive(Debug, Clone)]
pub struct AsrConfig {
    /// Path to the ggml model file.
    pub model_path: PathBuf,
    /// Transcription language hint.
    pub language: String,
    /// Decoder thread count.
    pub n_threads: i32,
    /// Offload to GPU when the engine was built with support for it.
    pub use_gpu: bool,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            language: "en".into(),
            n_threads: 4,
            use_gpu: true,
        }
    }
}

/// Language-model settings, tuned for short spoken replies.
#[derive(Debug, Clone)]
pub struct BrainConfig {
    /// Path to the GGUF model file.
    pub model_path: PathBuf,
    /// Prepended to every prompt.
    pub system_prompt: String,
    /// Layers to offload; 999 offloads everything that fits.
    pub n_gpu_layers: u32,
    /// Context window. Kept short for latency.
    pub n_ctx: u32,
    pub n_threads: i32,
    pub n_batch: u32,
    /// Generation cap per turn.
    pub max_new_tokens: usize,
    /// Prompt tokens kept (tail) before generation starts.
    pub max_prompt_tokens: usize,
    /// Cut generation at the first newline. Useful when models ramble.
    pub stop_on_newline: bool,
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    /// Seed for the distribution sampler.
    pub seed: u32,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            system_prompt: "You are Edna, a concise voice assistant. Answer in 1-2 sentences."
                .into(),
            n_gpu_layers: 999,
            n_ctx: 1024,
            n_threads: 4,
            n_batch: 256,
            max_new_tokens: 96,
            max_prompt_tokens: 384,
            stop_on_newline: true,
            temperature: 0.7,
            top_k: 40,
            top_p: 0.9,
            seed: 0xC0FFEE,
        }
    }
}

/// Speech-synthesis worker and playback settings.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Synthesis worker executable. The worker speaks the line protocol:
    /// `READY` once after model load, then one WAV path (or `ERR <detail>`)
    /// per request line.
    pub worker_bin: PathBuf,
    /// Synthesizer model name, exported to the worker as `EDNA_TTS_MODEL`.
    pub model_name: String,
    /// Where the worker writes its WAV files (`EDNA_TTS_TMP`).
    pub tmp_dir: PathBuf,
    /// Ask the worker to use CUDA (`EDNA_TTS_CUDA`), best effort.
    pub use_cuda: bool,
    /// Playback binary, invoked as `<bin> -D <device> [extra args] <wav>`.
    pub playback_bin: String,
    /// Playback device passed via `-D`. Empty skips the flag.
    pub playback_device: String,
    /// Extra playback arguments inserted before the WAV path.
    pub playback_extra_args: Vec<String>,
    /// How long to wait for the worker's `READY` line.
    pub handshake_timeout: Duration,
    /// Per-request synthesis timeout.
    pub request_timeout: Duration,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            worker_bin: PathBuf::new(),
            model_name: "tts_models/en/ljspeech/vits".into(),
            tmp_dir: PathBuf::from("/tmp"),
            use_cuda: false,
            playback_bin: "aplay".into(),
            playback_device: "plughw:CARD=V3,DEV=0".into(),
            playback_extra_args: Vec::new(),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Complete assistant configuration.
#[derive(Debug, Clone, Default)]
pub struct EdnaConfig {
    /// Root directory; model paths are derived from it.
    pub top_dir: PathBuf,
    pub engine: EngineConfig,
    pub asr: AsrConfig,
    pub brain: BrainConfig,
    pub speech: SpeechConfig,
}

impl EdnaConfig {
    /// Build the configuration from the `EDNA_*` environment.
    ///
    /// `EDNA_TOP_DIR` and `EDNA_TTS_COQUI_BIN` are required.
    /// `EDNA_TTS_MODEL` and `EDNA_TTS_DEVICE` fall back to their defaults.
    ///
    /// # Errors
    /// Returns `EdnaError::Config` when a required variable is unset or empty.
    pub fn from_env() -> Result<Self> {
        let top_dir = PathBuf::from(require_env("EDNA_TOP_DIR")?);

        let mut cfg = Self {
            asr: AsrConfig {
                model_path: top_dir.join(ASR_MODEL_REL),
                ..AsrConfig::default()
            },
            brain: BrainConfig {
                model_path: top_dir.join(LLM_MODEL_REL),
                ..BrainConfig::default()
            },
            speech: SpeechConfig {
                worker_bin: PathBuf::from(require_env("EDNA_TTS_COQUI_BIN")?),
                ..SpeechConfig::default()
            },
            top_dir,
            ..Self::default()
        };

        if let Some(model) = env_nonempty("EDNA_TTS_MODEL") {
            cfg.speech.model_name = model;
        }
        if let Some(device) = env_nonempty("EDNA_TTS_DEVICE") {
            cfg.speech.playback_device = device;
        }

        Ok(cfg)
    }
}

fn require_env(name: &str) -> Result<String> {
    env_nonempty(name)
        .ok_or_else(|| EdnaError::Config(format!("required environment variable {name} is not set")))
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_math_at_16khz() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.frame_samples(), 320);
        assert_eq!(cfg.cooldown_frames(), 30);
    }

    #[test]
    fn cooldown_rounds_up() {
        let cfg = EngineConfig {
            cooldown_ms: 610,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.cooldown_frames(), 31);
    }

    #[test]
    fn default_prompt_names_the_assistant() {
        let cfg = BrainConfig::default();
        assert!(cfg.system_prompt.contains("Edna"));
        assert_eq!(cfg.max_prompt_tokens, 384);
    }
}
