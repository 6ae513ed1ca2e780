//! Evaluation engine contract
//!
//! The generation loop never talks to llama.cpp directly; it drives an
//! external sequence-evaluation engine through the [`Evaluator`] trait. The
//! engine owns the model state and the KV cache, the loop only feeds it token
//! batches and asks it to sample or render tokens.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SamplingParams;

#[cfg(feature = "llama")]
pub mod llama;

/// An opaque vocabulary ID. The generation loop never inspects token
/// semantics; `Token(0)` doubles as the sentinel the context window is
/// seeded with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Token(pub i32);

/// Errors surfaced by an evaluation engine
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("Failed to initialize backend: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to create context: {0}")]
    ContextCreate(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Sampling failed: {0}")]
    Sampling(String),

    #[error("Detokenization failed: {0}")]
    Detokenization(String),
}

/// Baseline engine tunables, fixed at open time.
///
/// `n_batch` here is the engine-side decode buffer size; the loop's own
/// staging cap lives in [`crate::config::GenerationParams`] and is clamped
/// to it by [`crate::config::RunConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Context window size in tokens
    pub n_ctx: u32,
    /// Engine-side batch buffer size
    pub n_batch: u32,
    /// Sampling seed (0 = random)
    pub seed: u32,
    /// Threads used during evaluation
    pub n_threads: i32,
    /// Number of layers to offload to GPU (0 = CPU only)
    pub n_gpu_layers: u32,
    /// Lock model weights in memory
    pub use_mlock: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n_ctx: 2048,
            n_batch: 512,
            seed: 0,
            n_threads: 4,
            n_gpu_layers: 0,
            use_mlock: false,
        }
    }
}

/// Contract between the generation loop and a loaded engine session.
///
/// All failures are fatal to the session; the loop never retries. Resource
/// release is not part of the trait: implementors free engine state in their
/// `Drop`, which the session triggers exactly once on every exit path.
pub trait Evaluator {
    /// Fixed context capacity of this session.
    fn n_ctx(&self) -> usize;

    /// Convert text to tokens, optionally prepending the begin-of-stream
    /// marker.
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>, EngineError>;

    /// Advance engine state by evaluating `tokens` starting at position
    /// `n_past`. Blocking; the engine may parallelize internally.
    fn evaluate(&mut self, tokens: &[Token], n_past: usize) -> Result<(), EngineError>;

    /// Draw the next token conditioned on engine state, penalizing repeats
    /// within `window` (the trailing slice of the context history).
    fn sample(&mut self, window: &[Token], params: &SamplingParams) -> Result<Token, EngineError>;

    /// Render one token as a text fragment. May return an empty string while
    /// buffering an incomplete UTF-8 sequence.
    fn detokenize(&mut self, token: Token) -> Result<String, EngineError>;

    /// Whether `token` marks end of stream.
    fn is_eos(&self, token: Token) -> bool;

    /// Emit diagnostic timing info. Non-critical.
    fn report_timings(&self) {}
}
