//! Stop-sequence detection
//!
//! Watches the decoded trailing text of the session and reports when any
//! configured stop string ("antiprompt") appears as an exact suffix. The
//! matcher keeps only a bounded tail of decoded text, so a check never scans
//! the whole history.

/// Suffix matcher over a rolling window of decoded text.
#[derive(Debug)]
pub struct StopMatcher {
    stops: Vec<String>,
    /// Longest stop string in bytes; the tail is trimmed to this.
    max_len: usize,
    tail: String,
}

impl StopMatcher {
    pub fn new(stops: Vec<String>) -> Self {
        let max_len = stops.iter().map(|s| s.len()).max().unwrap_or(0);
        Self {
            stops,
            max_len,
            tail: String::new(),
        }
    }

    /// Feed a newly decoded fragment into the trailing window.
    pub fn observe(&mut self, fragment: &str) {
        if self.stops.is_empty() {
            return;
        }
        self.tail.push_str(fragment);
        if self.tail.len() > self.max_len {
            // Trim from the front at a char boundary, keeping max_len bytes.
            let mut cut = self.tail.len() - self.max_len;
            while cut > 0 && !self.tail.is_char_boundary(cut) {
                cut -= 1;
            }
            self.tail.drain(..cut);
        }
    }

    /// The first configured stop string that is an exact suffix of the
    /// trailing text, if any.
    pub fn check(&self) -> Option<&str> {
        self.stops
            .iter()
            .map(String::as_str)
            .find(|stop| !stop.is_empty() && self.tail.ends_with(stop))
    }
}
