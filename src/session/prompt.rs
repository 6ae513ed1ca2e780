//! Prompt consumption cursor

use crate::engine::Token;

/// Tracks how much of the tokenized prompt has been fed into the pipeline.
///
/// The token sequence is immutable after construction; `consumed` only ever
/// moves forward and never past the end.
#[derive(Debug)]
pub struct PromptCursor {
    tokens: Vec<Token>,
    consumed: usize,
}

impl PromptCursor {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            consumed: 0,
        }
    }

    /// Up to `max` unconsumed tokens, advancing the cursor by that count.
    /// Returns an empty slice once exhausted.
    pub fn next_batch(&mut self, max: usize) -> &[Token] {
        let end = self.consumed.saturating_add(max).min(self.tokens.len());
        let batch = &self.tokens[self.consumed..end];
        self.consumed = end;
        batch
    }

    pub fn is_exhausted(&self) -> bool {
        self.consumed >= self.tokens.len()
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(n: i32) -> Vec<Token> {
        (0..n).map(Token).collect()
    }

    #[test]
    fn test_next_batch_drains_in_order() {
        let mut cursor = PromptCursor::new(tokens(5));
        assert_eq!(cursor.next_batch(2), &[Token(0), Token(1)]);
        assert_eq!(cursor.next_batch(2), &[Token(2), Token(3)]);
        assert_eq!(cursor.next_batch(2), &[Token(4)]);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_exhausted_cursor_returns_empty() {
        let mut cursor = PromptCursor::new(tokens(1));
        cursor.next_batch(4);
        assert!(cursor.is_exhausted());
        assert!(cursor.next_batch(4).is_empty());
        assert_eq!(cursor.consumed(), 1);
    }

    #[test]
    fn test_consumed_is_monotonic_and_bounded() {
        let mut cursor = PromptCursor::new(tokens(7));
        let mut last = 0;
        for _ in 0..10 {
            cursor.next_batch(3);
            assert!(cursor.consumed() >= last);
            assert!(cursor.consumed() <= 7);
            last = cursor.consumed();
        }
        assert_eq!(cursor.consumed(), 7);
    }
}
