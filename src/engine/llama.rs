//! llama.cpp evaluation engine
//!
//! Adapter implementing the [`Evaluator`] contract on top of llama-cpp-2.
//! [`LlamaRuntime`] owns the backend and the loaded model;
//! [`LlamaEvaluator`] is one context-sized session borrowed from it. Engine
//! resources are freed by the llama-cpp-2 drop glue, so a session is
//! released exactly once when the evaluator goes out of scope.

use std::num::NonZeroU32;
use std::path::Path;
use std::time::Instant;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use tracing::info;

use crate::config::SamplingParams;
use crate::engine::{EngineConfig, EngineError, Evaluator, Token};

/// Loaded backend + model, from which evaluator sessions are opened.
pub struct LlamaRuntime {
    backend: LlamaBackend,
    model: LlamaModel,
    config: EngineConfig,
}

impl LlamaRuntime {
    /// Initialize the backend and load a model file.
    pub fn open<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self, EngineError> {
        let backend =
            LlamaBackend::init().map_err(|e| EngineError::BackendInit(e.to_string()))?;

        let model_params = LlamaModelParams::default()
            .with_n_gpu_layers(config.n_gpu_layers)
            .with_use_mlock(config.use_mlock);

        let model = LlamaModel::load_from_file(&backend, path.as_ref(), &model_params)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        info!(
            path = %path.as_ref().display(),
            vocab = model.n_vocab(),
            ctx_train = model.n_ctx_train(),
            "model loaded"
        );

        Ok(Self {
            backend,
            model,
            config,
        })
    }

    /// Open a fresh evaluation session sized to the configured context.
    pub fn evaluator(&self) -> Result<LlamaEvaluator<'_>, EngineError> {
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.config.n_ctx).or(NonZeroU32::new(2048)))
            .with_n_batch(self.config.n_batch.max(1))
            .with_n_threads(self.config.n_threads)
            .with_n_threads_batch(self.config.n_threads);

        let ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| EngineError::ContextCreate(e.to_string()))?;

        let seed = if self.config.seed == 0 {
            rand_seed()
        } else {
            self.config.seed
        };

        Ok(LlamaEvaluator {
            model: &self.model,
            ctx,
            seed,
            utf8_buffer: Vec::new(),
            n_eval: 0,
            started: Instant::now(),
        })
    }
}

/// One llama.cpp context implementing the evaluator contract.
pub struct LlamaEvaluator<'a> {
    model: &'a LlamaModel,
    ctx: LlamaContext<'a>,
    seed: u32,
    /// Staging for incomplete UTF-8 sequences split across tokens
    utf8_buffer: Vec<u8>,
    n_eval: usize,
    started: Instant,
}

impl Evaluator for LlamaEvaluator<'_> {
    fn n_ctx(&self) -> usize {
        self.ctx.n_ctx() as usize
    }

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>, EngineError> {
        let add_bos = if add_bos {
            AddBos::Always
        } else {
            AddBos::Never
        };
        let tokens = self
            .model
            .str_to_token(text, add_bos)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;
        Ok(tokens.into_iter().map(|t| Token(t.0)).collect())
    }

    fn evaluate(&mut self, tokens: &[Token], n_past: usize) -> Result<(), EngineError> {
        if tokens.is_empty() {
            return Ok(());
        }

        let mut batch = LlamaBatch::new(tokens.len(), 1);
        for (i, token) in tokens.iter().enumerate() {
            let is_last = i == tokens.len() - 1;
            batch
                .add(LlamaToken(token.0), (n_past + i) as i32, &[0], is_last)
                .map_err(|e| EngineError::Evaluation(e.to_string()))?;
        }

        self.ctx
            .decode(&mut batch)
            .map_err(|e| EngineError::Evaluation(e.to_string()))?;

        self.n_eval += tokens.len();
        Ok(())
    }

    fn sample(&mut self, window: &[Token], params: &SamplingParams) -> Result<Token, EngineError> {
        let mut sampler = if params.temperature < 0.01 {
            // Greedy for very low temperature, with penalties still applied
            LlamaSampler::chain_simple([
                LlamaSampler::penalties(window.len() as i32, params.repeat_penalty, 0.0, 0.0),
                LlamaSampler::greedy(),
            ])
        } else {
            // The chain is rebuilt per call so the penalty window can be
            // fed fresh; the seed must step, or every draw would restart
            // the same random stream.
            let step_seed = advance_seed(&mut self.seed);
            LlamaSampler::chain_simple([
                LlamaSampler::penalties(window.len() as i32, params.repeat_penalty, 0.0, 0.0),
                LlamaSampler::top_k(params.top_k),
                LlamaSampler::top_p(params.top_p, 1),
                LlamaSampler::temp(params.temperature),
                LlamaSampler::dist(step_seed),
            ])
        };

        // Feed the repetition window so the penalty sampler sees it.
        for token in window {
            sampler.accept(LlamaToken(token.0));
        }

        let token = sampler.sample(&self.ctx, -1);
        Ok(Token(token.0))
    }

    fn detokenize(&mut self, token: Token) -> Result<String, EngineError> {
        let bytes = self
            .model
            .token_to_bytes(LlamaToken(token.0), Special::Tokenize)
            .map_err(|e| EngineError::Detokenization(e.to_string()))?;

        self.utf8_buffer.extend_from_slice(&bytes);

        // Emit the longest valid UTF-8 prefix, keep the incomplete suffix.
        match std::str::from_utf8(&self.utf8_buffer) {
            Ok(s) => {
                let fragment = s.to_string();
                self.utf8_buffer.clear();
                Ok(fragment)
            }
            Err(e) => {
                let valid = e.valid_up_to();
                let fragment =
                    String::from_utf8_lossy(&self.utf8_buffer[..valid]).into_owned();
                self.utf8_buffer.drain(..valid);
                Ok(fragment)
            }
        }
    }

    fn is_eos(&self, token: Token) -> bool {
        self.model.is_eog_token(LlamaToken(token.0))
    }

    fn report_timings(&self) {
        let elapsed = self.started.elapsed();
        info!(
            n_eval = self.n_eval,
            elapsed_ms = elapsed.as_millis() as u64,
            "evaluator session finished"
        );
    }
}

/// Generates a random seed using system entropy
fn rand_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

/// Steps the sampling seed so each draw uses a fresh RNG stream while a run
/// stays reproducible from its starting seed.
fn advance_seed(seed: &mut u32) -> u32 {
    *seed = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    *seed
}
