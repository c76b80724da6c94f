//! Logging trait for chat session activity.
//!
//! This module provides the [`SessionLogger`] trait that allows callers to
//! capture every request a [`ChatSession`](crate::chat::ChatSession) issues,
//! the frames it decodes, and how each request ends.

use crate::chat::Outcome;
use crate::error::Error;
use crate::sse::Frame;
use crate::types::ChatCompletionRequest;

/// A trait for logging chat session operations.
///
/// Every method has an empty default, so implementors override only what they
/// care about. Methods may be called while the session holds its state lock;
/// they must not call back into the session.
///
/// # Example
///
/// ```rust,ignore
/// use streamchat::{Frame, SessionLogger};
///
/// struct FrameCounter(std::sync::atomic::AtomicUsize);
///
/// impl SessionLogger for FrameCounter {
///     fn log_frame(&self, _epoch: &str, _frame: &Frame) {
///         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
///     }
/// }
/// ```
pub trait SessionLogger: Send + Sync {
    /// Log an outbound request before it is sent.
    ///
    /// The credential is never part of the request body.
    fn log_request(&self, epoch: &str, request: &ChatCompletionRequest) {
        _ = (epoch, request);
    }

    /// Log a frame decoded from the response stream.
    fn log_frame(&self, epoch: &str, frame: &Frame) {
        _ = (epoch, frame);
    }

    /// Log a frame that was skipped because it could not be decoded.
    fn log_malformed_frame(&self, epoch: &str, error: &Error) {
        _ = (epoch, error);
    }

    /// Log how a request ended.
    fn log_outcome(&self, epoch: &str, outcome: &Outcome) {
        _ = (epoch, outcome);
    }

    /// Log a failed read or write against the key-value store.
    fn log_store_error(&self, error: &Error) {
        _ = error;
    }
}

/// Logger that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl SessionLogger for NoopLogger {}

/// Logger that writes one line per event to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrLogger;

impl SessionLogger for StderrLogger {
    fn log_request(&self, epoch: &str, request: &ChatCompletionRequest) {
        eprintln!(
            "[{epoch}] request: model={} messages={}",
            request.model,
            request.messages.len()
        );
    }

    fn log_frame(&self, epoch: &str, frame: &Frame) {
        match frame {
            Frame::Delta(text) => eprintln!("[{epoch}] delta: {text:?}"),
            Frame::Done => eprintln!("[{epoch}] done"),
        }
    }

    fn log_malformed_frame(&self, epoch: &str, error: &Error) {
        eprintln!("[{epoch}] skipped frame: {error}");
    }

    fn log_outcome(&self, epoch: &str, outcome: &Outcome) {
        eprintln!("[{epoch}] outcome: {outcome}");
    }

    fn log_store_error(&self, error: &Error) {
        eprintln!("store: {error}");
    }
}
