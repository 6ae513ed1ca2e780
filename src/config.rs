//! Run configuration
//!
//! Sampling and loop parameters plus optional JSON persistence for a full
//! run description (model path, prompt, stop strings, engine tunables).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineConfig;

/// Errors that can occur while loading or saving a run configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No prompt given (set `prompt` or `prompt_file`)")]
    MissingPrompt,
}

/// Parameters handed to the engine's sampling operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Top-k sampling parameter
    pub top_k: i32,
    /// Top-p (nucleus) sampling parameter (0.0 - 1.0)
    pub top_p: f32,
    /// Temperature (< 0.01 = greedy)
    pub temperature: f32,
    /// Repetition penalty applied over the repeat window
    pub repeat_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            top_k: 40,
            top_p: 0.95,
            temperature: 0.8,
            repeat_penalty: 1.1,
        }
    }
}

/// Parameters governing one generation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling configuration
    pub sampling: SamplingParams,
    /// Staging cap: tokens fed to the engine per evaluate call
    pub n_batch: u32,
    /// Prompt prefix always retained on context overflow (-1 = whole prompt)
    pub n_keep: i32,
    /// Trailing window considered for the repetition penalty
    pub repeat_last_n: u32,
    /// Cap on sampled tokens (None = run until a stop condition)
    pub max_tokens: Option<u32>,
    /// Keep generating past the end-of-stream token
    pub ignore_eos: bool,
    /// Stop sequences ("antiprompts") that halt generation
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            sampling: SamplingParams::default(),
            n_batch: 8,
            n_keep: 0,
            repeat_last_n: 64,
            max_tokens: None,
            ignore_eos: false,
            stop_sequences: Vec::new(),
        }
    }
}

impl GenerationParams {
    /// Clamp parameters to usable ranges
    pub fn validate(&mut self) {
        self.sampling.temperature = self.sampling.temperature.clamp(0.0, 2.0);
        self.sampling.top_p = self.sampling.top_p.clamp(0.0, 1.0);

        if self.sampling.top_k <= 0 {
            self.sampling.top_k = 40;
        }

        if self.sampling.repeat_penalty <= 0.0 {
            self.sampling.repeat_penalty = 1.0;
        }

        if self.n_batch == 0 {
            self.n_batch = 8;
        }

        if self.repeat_last_n == 0 {
            self.repeat_last_n = 64;
        }

        if self.n_keep < -1 {
            self.n_keep = -1;
        }
    }
}

/// A complete run description, loadable from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Path to the model file
    pub model: PathBuf,
    /// Inline prompt text
    pub prompt: Option<String>,
    /// File to read the prompt from (used when `prompt` is unset)
    pub prompt_file: Option<PathBuf>,
    /// Engine tunables
    pub engine: EngineConfig,
    /// Loop and sampling parameters
    pub params: GenerationParams,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::new(),
            prompt: None,
            prompt_file: None,
            engine: EngineConfig::default(),
            params: GenerationParams::default(),
        }
    }
}

impl RunConfig {
    /// Clamp all parameters, including limits that span the engine and loop
    /// settings. The loop's staging cap must not exceed the engine's decode
    /// buffer or every `decode` call would fail at runtime.
    pub fn validate(&mut self) {
        self.params.validate();
        if self.params.n_batch > self.engine.n_batch {
            self.params.n_batch = self.engine.n_batch;
        }
    }

    /// Load a run configuration from a JSON file, clamping loaded values
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path.as_ref())?;
        let mut config: RunConfig = serde_json::from_str(&json)?;
        config.validate();
        tracing::debug!(path = %path.as_ref().display(), "loaded run config");
        Ok(config)
    }

    /// Save this configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        tracing::debug!(path = %path.as_ref().display(), "saved run config");
        Ok(())
    }

    /// Resolve the prompt text: inline takes precedence over `prompt_file`.
    pub fn resolve_prompt(&self) -> Result<String, ConfigError> {
        if let Some(prompt) = &self.prompt {
            return Ok(prompt.clone());
        }
        if let Some(path) = &self.prompt_file {
            return Ok(fs::read_to_string(path)?);
        }
        Err(ConfigError::MissingPrompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = GenerationParams::default();
        assert_eq!(params.sampling.top_k, 40);
        assert!((params.sampling.top_p - 0.95).abs() < 0.001);
        assert_eq!(params.n_batch, 8);
        assert_eq!(params.repeat_last_n, 64);
        assert_eq!(params.max_tokens, None);
        assert!(params.stop_sequences.is_empty());
    }

    #[test]
    fn test_params_validation() {
        let mut params = GenerationParams::default();

        params.sampling.temperature = 5.0;
        params.validate();
        assert_eq!(params.sampling.temperature, 2.0);

        params.sampling.top_p = 2.0;
        params.validate();
        assert_eq!(params.sampling.top_p, 1.0);

        params.n_batch = 0;
        params.validate();
        assert_eq!(params.n_batch, 8);

        params.n_keep = -5;
        params.validate();
        assert_eq!(params.n_keep, -1);
    }

    #[test]
    fn test_loop_batch_clamped_to_engine_batch() {
        let mut config = RunConfig::default();
        config.params.n_batch = 4096;
        config.engine.n_batch = 512;
        config.validate();
        assert_eq!(config.params.n_batch, 512);

        // An in-range cap is left alone.
        config.params.n_batch = 8;
        config.validate();
        assert_eq!(config.params.n_batch, 8);
    }

    #[test]
    fn test_config_serialization() {
        let config = RunConfig {
            model: PathBuf::from("model.gguf"),
            prompt: Some("hello".to_string()),
            ..RunConfig::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RunConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.model, deserialized.model);
        assert_eq!(config.prompt, deserialized.prompt);
        assert_eq!(config.engine.n_ctx, deserialized.engine.n_ctx);
    }

    #[test]
    fn test_config_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");

        let mut config = RunConfig::default();
        config.model = PathBuf::from("model.gguf");
        config.params.stop_sequences = vec!["### Human:".to_string()];
        config.save(&path).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded.model, config.model);
        assert_eq!(loaded.params.stop_sequences, config.params.stop_sequences);
    }

    #[test]
    fn test_resolve_prompt() {
        let mut config = RunConfig::default();
        assert!(matches!(
            config.resolve_prompt(),
            Err(ConfigError::MissingPrompt)
        ));

        config.prompt = Some("inline".to_string());
        assert_eq!(config.resolve_prompt().unwrap(), "inline");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        fs::write(&path, "from file").unwrap();

        config.prompt = None;
        config.prompt_file = Some(path);
        assert_eq!(config.resolve_prompt().unwrap(), "from file");
    }
}
