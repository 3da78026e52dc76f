//! Optional operator settings (JSON file in the top directory).
//!
//! The environment contract covers the required paths; this file carries
//! the tuning knobs an installation may want to pin without rebuilding.
//! Every field has a default, so a missing or partial file is fine.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use edna_core::EdnaConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Capture device name; `null` keeps the built-in default.
    pub capture_device: Option<String>,
    /// VAD aggressiveness, 0..=3.
    pub vad_mode: u8,
    /// Mic-gate tail after playback, in milliseconds.
    pub cooldown_ms: u32,
    /// Overrides the built-in system prompt when set.
    pub system_prompt: Option<String>,
    /// Generation cap per turn.
    pub max_new_tokens: usize,
    /// Cut replies at the first newline.
    pub stop_on_newline: bool,
    /// Ask the synthesis worker to use CUDA.
    pub tts_use_cuda: bool,
    /// Playback binary.
    pub playback_bin: String,
    /// Extra playback arguments inserted before the WAV path.
    pub playback_extra_args: Vec<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            capture_device: None,
            vad_mode: 2,
            cooldown_ms: 600,
            system_prompt: None,
            max_new_tokens: 96,
            stop_on_newline: true,
            tts_use_cuda: false,
            playback_bin: "aplay".into(),
            playback_extra_args: Vec::new(),
        }
    }
}

impl AppSettings {
    /// Overlay these settings on an environment-derived configuration.
    pub fn apply(&self, config: &mut EdnaConfig) {
        if let Some(device) = &self.capture_device {
            config.engine.capture_device = Some(device.clone());
        }
        config.engine.vad_mode = self.vad_mode;
        config.engine.cooldown_ms = self.cooldown_ms;

        if let Some(prompt) = &self.system_prompt {
            config.brain.system_prompt = prompt.clone();
        }
        config.brain.max_new_tokens = self.max_new_tokens;
        config.brain.stop_on_newline = self.stop_on_newline;

        config.speech.use_cuda = self.tts_use_cuda;
        config.speech.playback_bin = self.playback_bin.clone();
        config.speech.playback_extra_args = self.playback_extra_args.clone();
    }
}

pub fn default_settings_path(top_dir: &Path) -> PathBuf {
    top_dir.join("edna.settings.json")
}

/// Load settings, falling back to defaults when the file is missing or
/// unreadable. A malformed file is reported but never fatal.
pub fn load_settings(path: &Path) -> AppSettings {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("ignoring malformed settings file {}: {e}", path.display());
                AppSettings::default()
            }
        },
        Err(_) => AppSettings::default(),
    }
}
