//! Scripted engine shared by the session tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::SamplingParams;
use crate::engine::{EngineError, Evaluator, Token};

/// End-of-stream token the mock reports from `is_eos`.
pub(crate) const EOS: Token = Token(-2);

/// Scripted engine: records every evaluate call, pops sampled tokens from a
/// queue, renders tokens via a lookup table, and counts drops so tests can
/// assert the single-release guarantee.
pub(crate) struct MockEngine {
    n_ctx: usize,
    prompt_tokens: Vec<Token>,
    script: VecDeque<Token>,
    vocab: HashMap<i32, String>,
    pub(crate) eval_calls: Vec<(Vec<Token>, usize)>,
    pub(crate) fail_eval_at: Option<usize>,
    samples: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl MockEngine {
    pub(crate) fn new(
        n_ctx: usize,
        prompt_len: i32,
        script: Vec<Token>,
    ) -> (Self, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let engine = Self {
            n_ctx,
            prompt_tokens: (1..=prompt_len).map(Token).collect(),
            script: script.into(),
            vocab: HashMap::new(),
            eval_calls: Vec::new(),
            fail_eval_at: None,
            samples: Arc::new(AtomicUsize::new(0)),
            released: released.clone(),
        };
        (engine, released)
    }

    pub(crate) fn with_vocab(mut self, entries: &[(i32, &str)]) -> Self {
        for (id, text) in entries {
            self.vocab.insert(*id, text.to_string());
        }
        self
    }

    /// Shared count of sample calls, for asserting early halts.
    pub(crate) fn samples_handle(&self) -> Arc<AtomicUsize> {
        self.samples.clone()
    }
}

impl Evaluator for MockEngine {
    fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    fn tokenize(&self, _text: &str, _add_bos: bool) -> Result<Vec<Token>, EngineError> {
        Ok(self.prompt_tokens.clone())
    }

    fn evaluate(&mut self, tokens: &[Token], n_past: usize) -> Result<(), EngineError> {
        if self.fail_eval_at == Some(self.eval_calls.len()) {
            return Err(EngineError::Evaluation("scripted failure".to_string()));
        }
        self.eval_calls.push((tokens.to_vec(), n_past));
        Ok(())
    }

    fn sample(&mut self, _window: &[Token], _params: &SamplingParams) -> Result<Token, EngineError> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        self.script
            .pop_front()
            .ok_or_else(|| EngineError::Sampling("script exhausted".to_string()))
    }

    fn detokenize(&mut self, token: Token) -> Result<String, EngineError> {
        Ok(self
            .vocab
            .get(&token.0)
            .cloned()
            .unwrap_or_else(|| format!("<{}>", token.0)))
    }

    fn is_eos(&self, token: Token) -> bool {
        token == EOS
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
