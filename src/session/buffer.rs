//! Token buffers
//!
//! Two staging structures back the generation loop: the fixed-capacity
//! [`ContextWindow`] holding the rolling history the engine conditions on,
//! and the transient [`PendingBatch`] of tokens staged for the next
//! evaluate call.

use crate::engine::Token;

/// Rolling history of the last `n_ctx` tokens, oldest first.
///
/// The window is always exactly `capacity` long; it starts seeded with the
/// `Token(0)` sentinel and every `push` overwrites the oldest slot. Backed by
/// a ring so pushes are O(1) rather than the front-erase/back-push shift.
#[derive(Debug)]
pub struct ContextWindow {
    buf: Box<[Token]>,
    /// Index of the oldest element
    head: usize,
}

impl ContextWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "context window capacity must be non-zero");
        Self {
            buf: vec![Token::default(); capacity].into_boxed_slice(),
            head: 0,
        }
    }

    /// Fixed capacity; also the current length, by construction.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Append `token`, evicting the oldest entry.
    pub fn push(&mut self, token: Token) {
        self.buf[self.head] = token;
        self.head = (self.head + 1) % self.buf.len();
    }

    /// Copy of the logical range `[offset, offset + len)`, clamped to the
    /// window bounds.
    pub fn slice(&self, offset: usize, len: usize) -> Vec<Token> {
        let cap = self.buf.len();
        let start = offset.min(cap);
        let end = offset.saturating_add(len).min(cap);
        (start..end)
            .map(|i| self.buf[(self.head + i) % cap])
            .collect()
    }

    /// Copy of the most recent `n` tokens (the whole window if `n` exceeds
    /// the capacity).
    pub fn last_n(&self, n: usize) -> Vec<Token> {
        let cap = self.buf.len();
        let n = n.min(cap);
        self.slice(cap - n, n)
    }
}

/// Tokens staged but not yet evaluated.
#[derive(Debug, Default)]
pub struct PendingBatch {
    tokens: Vec<Token>,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: Token) {
        self.tokens.push(token);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }

    pub fn as_slice(&self) -> &[Token] {
        &self.tokens
    }

    /// Insert `prefix` ahead of the staged tokens. Used only by context-shift
    /// eviction to re-feed recycled history before the new tokens.
    pub fn replace_prefix(&mut self, prefix: &[Token]) {
        self.tokens.splice(0..0, prefix.iter().copied());
    }
}
