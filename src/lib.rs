//! spindle
//!
//! Drives autoregressive token generation against the fixed-size context
//! window of an external sequence-evaluation engine. A session turns a
//! prompt into an ordered stream of decoded text fragments while honoring
//! the engine's context capacity (with context-shift eviction past the
//! limit), a batching cap, a rolling repetition-penalty window, and a set of
//! stop sequences.
//!
//! The engine itself is pluggable via [`engine::Evaluator`]; a llama.cpp
//! adapter is available behind the `llama` feature.

pub mod config;
pub mod engine;
pub mod session;

pub use config::{ConfigError, GenerationParams, RunConfig, SamplingParams};
pub use engine::{EngineConfig, EngineError, Evaluator, Token};
pub use session::{FinishReason, GenerationSession, SessionError, StreamEvent};
