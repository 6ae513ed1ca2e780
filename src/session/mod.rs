//! Generation session
//!
//! The state machine driving token generation: buffers, prompt cursor, stop
//! detection, context-shift eviction, and the loop tying them together.

pub mod buffer;
pub mod generation;
pub mod prompt;
pub mod stop;
pub mod streaming;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use buffer::{ContextWindow, PendingBatch};
pub use generation::{FinishReason, GenerationSession, SessionError};
pub use prompt::PromptCursor;
pub use stop::StopMatcher;
pub use streaming::{run_to_channel, StreamEvent};
