//! llama.cpp reply backend via the llama-cpp-2 bindings.
//!
//! The model weights are loaded exactly once. Each turn builds a fresh
//! context and sampler from the persistent model handle: turns are
//! stateless by design, and a new context is the portable way to start
//! from an empty KV cache.

use std::num::NonZeroU32;
use std::sync::{Arc, Weak};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::Chatter;
use crate::config::BrainConfig;
use crate::error::{EdnaError, Result};

/// Process-wide backend registry. llama.cpp has global init/teardown, so
/// every chatter shares one `Arc<LlamaBackend>`: init happens on the first
/// acquire, teardown when the last handle drops.
static BACKEND: Mutex<Weak<LlamaBackend>> = Mutex::new(Weak::new());

fn backend_acquire() -> Result<Arc<LlamaBackend>> {
    let mut slot = BACKEND.lock();
    if let Some(backend) = slot.upgrade() {
        return Ok(backend);
    }
    let backend = Arc::new(
        LlamaBackend::init().map_err(|e| EdnaError::Brain(format!("backend init: {e}")))?,
    );
    *slot = Arc::downgrade(&backend);
    Ok(backend)
}

/// Generates replies with a GGUF model loaded once at startup.
pub struct LlamaChatter {
    backend: Arc<LlamaBackend>,
    model: LlamaModel,
    config: BrainConfig,
}

impl LlamaChatter {
    /// # Errors
    /// Returns `EdnaError::Brain` when the backend or model fails to load.
    pub fn new(config: &BrainConfig) -> Result<Self> {
        let backend = backend_acquire()?;

        info!(model = %config.model_path.display(), "loading language model");
        let model_params = LlamaModelParams::default().with_n_gpu_layers(config.n_gpu_layers);
        let model = LlamaModel::load_from_file(&backend, &config.model_path, &model_params)
            .map_err(|e| EdnaError::Brain(format!("model load failed: {e}")))?;
        info!("language model ready");

        Ok(Self {
            backend,
            model,
            config: config.clone(),
        })
    }

    fn build_prompt(&self, command: &str) -> String {
        let mut prompt =
            String::with_capacity(self.config.system_prompt.len() + command.len() + 16);
        prompt.push_str(&self.config.system_prompt);
        if !prompt.is_empty() && !prompt.ends_with('\n') {
            prompt.push('\n');
        }
        prompt.push_str("User: ");
        prompt.push_str(command);
        prompt.push_str("\nEdna:");
        prompt
    }

    fn make_sampler(&self) -> LlamaSampler {
        LlamaSampler::chain_simple([
            LlamaSampler::temp(self.config.temperature),
            LlamaSampler::top_k(self.config.top_k),
            LlamaSampler::top_p(self.config.top_p, 1),
            LlamaSampler::dist(self.config.seed),
        ])
    }
}

impl Chatter for LlamaChatter {
    fn reply(&mut self, command: &str) -> Result<String> {
        let n_ctx = self.config.n_ctx.max(64);
        let n_batch = self.config.n_batch.max(8);

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_threads(self.config.n_threads)
            .with_n_batch(n_batch);

        let mut ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| EdnaError::Brain(format!("context init: {e}")))?;

        let prompt = self.build_prompt(command);
        let mut tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .map_err(|e| EdnaError::Brain(format!("tokenize: {e}")))?;
        if tokens.is_empty() {
            return Err(EdnaError::Brain("empty prompt".into()));
        }

        // Clamp the prompt so generation always fits in the context; keep
        // the tail, since the recent text matters most, and restore BOS.
        let safety = (self.config.max_new_tokens + 8).max(32);
        let max_prompt = self
            .config
            .max_prompt_tokens
            .min((n_ctx as usize).saturating_sub(safety))
            .max(16);
        if tokens.len() > max_prompt {
            tokens.drain(..tokens.len() - max_prompt);
            let bos = self.model.token_bos();
            if tokens.first() != Some(&bos) {
                tokens.insert(0, bos);
            }
        }

        let mut batch = LlamaBatch::new(n_batch as usize, 1);
        let mut pos: i32 = 0;

        // Prompt decode, one token per step; logits only on the last one.
        let last = tokens.len() - 1;
        for (i, token) in tokens.iter().enumerate() {
            if pos >= n_ctx as i32 {
                break;
            }
            batch.clear();
            batch
                .add(*token, pos, &[0], i == last)
                .map_err(|e| EdnaError::Brain(format!("batch add: {e}")))?;
            ctx.decode(&mut batch)
                .map_err(|e| EdnaError::Brain(format!("prompt decode: {e}")))?;
            pos += 1;
        }

        // Samplers are stateful; a chain built after prompt decode starts
        // from a clean slate for the first sample.
        let mut sampler = self.make_sampler();

        let mut out = String::new();
        for _ in 0..self.config.max_new_tokens {
            if pos >= n_ctx as i32 - 1 {
                break;
            }

            let token = sampler.sample(&ctx, -1);
            sampler.accept(token);

            if self.model.is_eog_token(token) {
                break;
            }

            match self.model.token_to_str(token, Special::Tokenize) {
                Ok(piece) => out.push_str(&piece),
                Err(e) => debug!("skipping unrepresentable token: {e}"),
            }

            if self.config.stop_on_newline {
                if let Some(nl) = out.find('\n') {
                    out.truncate(nl);
                    break;
                }
            }

            batch.clear();
            batch
                .add(token, pos, &[0], true)
                .map_err(|e| EdnaError::Brain(format!("batch add: {e}")))?;
            ctx.decode(&mut batch)
                .map_err(|e| EdnaError::Brain(format!("decode: {e}")))?;
            pos += 1;
        }

        Ok(out.trim().to_string())
    }
}
