//! Streaming surface
//!
//! Bridges a generation session onto an mpsc channel so a caller on another
//! thread can consume decoded fragments as they are produced.

use std::sync::atomic::Ordering;
use std::sync::mpsc::Sender;

use tracing::debug;

use crate::engine::Evaluator;
use crate::session::generation::{FinishReason, GenerationSession};

/// Events emitted while streaming a session.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A decoded text fragment
    Fragment(String),
    /// Generation completed
    Done(FinishReason),
    /// A fatal error occurred; fragments already sent remain valid
    Error(String),
}

impl StreamEvent {
    /// Extracts the fragment text if this is a Fragment variant
    pub fn as_fragment(&self) -> Option<&str> {
        match self {
            StreamEvent::Fragment(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true if generation is complete
    pub fn is_done(&self) -> bool {
        matches!(self, StreamEvent::Done(_))
    }

    /// Extracts the error message if this is an Error variant
    pub fn as_error(&self) -> Option<&str> {
        match self {
            StreamEvent::Error(s) => Some(s),
            _ => None,
        }
    }
}

/// Run `session` to completion, sending every fragment over `tx` followed by
/// a terminal `Done` or `Error` event.
///
/// If the receiver hangs up mid-generation, the session is cancelled at the
/// next step; engine resources are released either way.
pub fn run_to_channel<E: Evaluator>(session: GenerationSession<E>, tx: Sender<StreamEvent>) {
    let cancel = session.cancel_handle();

    let result = session.run(|fragment| {
        if tx.send(StreamEvent::Fragment(fragment.to_string())).is_err() {
            debug!("receiver dropped, cancelling session");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    match result {
        Ok(reason) => {
            let _ = tx.send(StreamEvent::Done(reason));
        }
        Err(e) => {
            let _ = tx.send(StreamEvent::Error(e.to_string()));
        }
    }
}
