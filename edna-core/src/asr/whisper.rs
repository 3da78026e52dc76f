//! whisper.cpp transcription backend via the whisper-rs bindings.

use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::Transcriber;
use crate::config::AsrConfig;
use crate::error::{EdnaError, Result};
use crate::segmenter::Utterance;
use crate::text::BLANK_AUDIO;

/// Transcribes utterances with a whisper.cpp model loaded once at startup.
pub struct WhisperTranscriber {
    ctx: WhisperContext,
    config: AsrConfig,
}

impl WhisperTranscriber {
    /// Load the ggml model. GPU offload is enabled when the library was
    /// built with support for it.
    ///
    /// # Errors
    /// Returns `EdnaError::Asr` when the model cannot be loaded.
    pub fn new(config: &AsrConfig) -> Result<Self> {
        let path = config
            .model_path
            .to_str()
            .ok_or_else(|| EdnaError::Asr("non-UTF-8 model path".into()))?;

        info!(model = path, "loading speech recognition model");

        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.use_gpu(config.use_gpu);

        let ctx = WhisperContext::new_with_params(path, ctx_params)
            .map_err(|e| EdnaError::Asr(format!("failed to load model: {e}")))?;

        info!("speech recognition model ready");
        Ok(Self {
            ctx,
            config: config.clone(),
        })
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&mut self, utterance: &Utterance) -> Result<String> {
        if utterance.samples.is_empty() {
            return Ok(String::new());
        }

        // S16LE to normalized f32.
        let pcm: Vec<f32> = utterance
            .samples
            .iter()
            .map(|s| *s as f32 / 32768.0)
            .collect();

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| EdnaError::Asr(format!("state init: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.config.language));
        params.set_n_threads(self.config.n_threads);
        params.set_translate(false);
        params.set_single_segment(true);
        params.set_no_context(true);
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &pcm)
            .map_err(|e| EdnaError::Asr(format!("inference failed: {e}")))?;

        let n_segments = state
            .full_n_segments()
            .map_err(|e| EdnaError::Asr(format!("segment count: {e}")))?;

        let mut text = String::new();
        for i in 0..n_segments {
            let segment = state
                .full_get_segment_text(i)
                .map_err(|e| EdnaError::Asr(format!("segment text: {e}")))?;
            text.push_str(&segment);
        }

        let text = text.trim();
        if text == BLANK_AUDIO {
            return Ok(String::new());
        }
        Ok(text.to_string())
    }
}
