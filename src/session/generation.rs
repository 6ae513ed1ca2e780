//! Generation session
//!
//! The core state machine: primes the engine with the prompt, then samples
//! tokens one at a time, shifting the context window when history would
//! exceed the engine's capacity, and halting on a stop sequence, the
//! end-of-stream token, a sampled-token cap, or cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::GenerationParams;
use crate::engine::{EngineError, Evaluator, Token};
use crate::session::buffer::{ContextWindow, PendingBatch};
use crate::session::prompt::PromptCursor;
use crate::session::stop::StopMatcher;

/// Errors that can occur while running a generation session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Prompt tokenized to zero tokens")]
    EmptyPrompt,

    #[error("Prompt ({tokens} tokens) exceeds the context window ({n_ctx})")]
    PromptTooLong { tokens: usize, n_ctx: usize },

    #[error("Pending batch ({pending} tokens) exceeds the context window ({n_ctx})")]
    WindowOverflow { pending: usize, n_ctx: usize },
}

/// Why a session halted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// A configured stop sequence appeared as a suffix of the output
    StopSequence,
    /// The engine sampled its end-of-stream token
    Eos,
    /// The sampled-token cap was reached
    Length,
    /// The cancellation flag was raised
    Cancelled,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopSequence => write!(f, "stop_sequence"),
            Self::Eos => write!(f, "eos"),
            Self::Length => write!(f, "length"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Consuming the prompt
    Priming,
    /// Sampling new tokens
    Generating,
}

/// One generation session over an owned engine.
///
/// The session exclusively owns its buffers and the engine for its whole
/// lifetime; dropping the engine (on every exit path of [`run`]) releases
/// engine resources exactly once.
///
/// [`run`]: GenerationSession::run
pub struct GenerationSession<E: Evaluator> {
    engine: E,
    params: GenerationParams,
    window: ContextWindow,
    pending: PendingBatch,
    prompt: PromptCursor,
    stops: StopMatcher,
    phase: Phase,
    /// Tokens evaluated so far (engine position)
    n_past: usize,
    /// Prompt prefix retained across context shifts
    n_keep: usize,
    n_sampled: u32,
    cancel: Arc<AtomicBool>,
}

impl<E: Evaluator> GenerationSession<E> {
    /// Tokenize `prompt` and set up session state sized to the engine's
    /// context capacity.
    pub fn new(engine: E, prompt: &str, params: GenerationParams) -> Result<Self, SessionError> {
        let tokens = engine.tokenize(prompt, true)?;
        if tokens.is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        let n_ctx = engine.n_ctx();
        if tokens.len() > n_ctx {
            return Err(SessionError::PromptTooLong {
                tokens: tokens.len(),
                n_ctx,
            });
        }

        // The anchor is capped below the context size so a shift always
        // frees room for the re-staged half plus new tokens.
        let keep_cap = n_ctx.saturating_sub(4);
        let n_keep = match params.n_keep {
            -1 => tokens.len(),
            k => (k.max(0) as usize).min(tokens.len()),
        }
        .min(keep_cap);

        debug!(
            prompt_tokens = tokens.len(),
            n_ctx, n_keep, "session created"
        );

        Ok(Self {
            window: ContextWindow::new(n_ctx),
            pending: PendingBatch::new(),
            prompt: PromptCursor::new(tokens),
            stops: StopMatcher::new(params.stop_sequences.clone()),
            phase: Phase::Priming,
            n_past: 0,
            n_keep,
            n_sampled: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            engine,
            params,
        })
    }

    /// Handle you can keep and flip to cancel generation between steps
    /// (`store(true)`).
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run the session to completion, handing each decoded fragment to
    /// `on_fragment` in order.
    ///
    /// Consumes the session: the engine is dropped (and thereby released)
    /// when this returns, whether the loop halted normally, was cancelled,
    /// or an engine call failed. Fragments already emitted remain valid on
    /// failure.
    pub fn run<F>(mut self, mut on_fragment: F) -> Result<FinishReason, SessionError>
    where
        F: FnMut(&str),
    {
        let result = self.drive(&mut on_fragment);
        self.engine.report_timings();
        match &result {
            Ok(reason) => info!(%reason, n_sampled = self.n_sampled, "session halted"),
            Err(e) => info!(error = %e, n_sampled = self.n_sampled, "session failed"),
        }
        result
    }

    fn drive<F>(&mut self, on_fragment: &mut F) -> Result<FinishReason, SessionError>
    where
        F: FnMut(&str),
    {
        let n_batch = self.params.n_batch.max(1) as usize;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                debug!("cancellation requested");
                return Ok(FinishReason::Cancelled);
            }

            // 1. Evaluate staged tokens, shifting the window first if the
            // history would overflow the context capacity.
            if !self.pending.is_empty() {
                if self.n_past + self.pending.len() > self.window.capacity() {
                    self.shift_context()?;
                }
                // Chunked so every engine call stays within the batch cap,
                // even right after a shift re-staged half a window.
                let mut offset = 0;
                while offset < self.pending.len() {
                    let end = (offset + n_batch).min(self.pending.len());
                    self.engine
                        .evaluate(&self.pending.as_slice()[offset..end], self.n_past)?;
                    self.n_past += end - offset;
                    offset = end;
                }
                self.pending.clear();
            }

            // 2. Produce: sample one token, or drain the next prompt slice.
            let mut sampled = None;
            match self.phase {
                Phase::Generating => {
                    let window_tail = self.window.last_n(self.params.repeat_last_n as usize);
                    let id = self.engine.sample(&window_tail, &self.params.sampling)?;
                    self.window.push(id);
                    self.pending.push(id);
                    self.n_sampled += 1;
                    sampled = Some(id);
                }
                Phase::Priming => {
                    let drained = self.prompt.next_batch(n_batch).to_vec();
                    for &token in &drained {
                        self.window.push(token);
                        self.pending.push(token);
                    }
                    if self.prompt.is_exhausted() {
                        debug!(consumed = self.prompt.consumed(), "prompt consumed");
                        self.phase = Phase::Generating;
                    }
                }
            }

            // 3. Emit the tokens produced this step. Tokens re-staged by a
            // context shift were emitted when first produced and are skipped
            // (the shift happens in step 1, before this batch was filled).
            for i in 0..self.pending.len() {
                let token = self.pending.as_slice()[i];
                let fragment = self.engine.detokenize(token)?;
                if !fragment.is_empty() {
                    self.stops.observe(&fragment);
                    on_fragment(&fragment);
                }
            }

            // 4. Halt conditions, active once the prompt is consumed.
            if self.prompt.is_exhausted() {
                if let Some(id) = sampled {
                    if !self.params.ignore_eos && self.engine.is_eos(id) {
                        return Ok(FinishReason::Eos);
                    }
                }
                if let Some(stop) = self.stops.check() {
                    debug!(stop, "stop sequence matched");
                    return Ok(FinishReason::StopSequence);
                }
                if let Some(max) = self.params.max_tokens {
                    if self.n_sampled >= max {
                        return Ok(FinishReason::Length);
                    }
                }
            }
        }
    }

    /// Context-shift eviction: retain the first `n_keep` prompt tokens as
    /// anchor context, discard the middle of history, and re-stage the most
    /// recent half of the discarded span ahead of the pending tokens so
    /// generation can continue past the nominal context limit.
    fn shift_context(&mut self) -> Result<(), SessionError> {
        let n_ctx = self.window.capacity();
        let pending_len = self.pending.len();
        if pending_len > n_ctx {
            return Err(SessionError::WindowOverflow {
                pending: pending_len,
                n_ctx,
            });
        }

        let n_left = self.n_past.saturating_sub(self.n_keep);
        debug!(
            n_past = self.n_past,
            n_keep = self.n_keep,
            n_left,
            "context window full, shifting"
        );
        self.n_past = self.n_keep;

        // Slice bounds clamped: the half-window formula is inherited behavior
        // and can undershoot when n_left is odd or n_keep is 0.
        let end = n_ctx - pending_len;
        let start = end.saturating_sub(n_left / 2);
        let recycled = self.window.slice(start, end - start);
        self.pending.replace_prefix(&recycled);
        Ok(())
    }
}
