//! Core chat session management.
//!
//! This module provides the [`ChatSession`] struct which owns the transcript,
//! persists it, and runs at most one streaming request at a time.
//!
//! A submission moves through `Idle -> Sending -> Streaming` and ends as
//! `Completed`, `Failed`, or `Cancelled`, after which the session is `Idle`
//! again. The id of the in-flight assistant message is the request's epoch;
//! every mutation a request makes is applied only while its epoch is still the
//! active one, so a superseded stream can never write into the transcript.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chat::config::ChatConfig;
use crate::client::Transport;
use crate::error::{Error, Result};
use crate::observability::{
    SESSION_CANCELLATIONS, SESSION_COMPLETIONS, SESSION_FAILURES, SESSION_MISSING_CREDENTIAL,
    SESSION_SUBMITS, STORE_ERRORS, STREAM_BYTES, STREAM_DURATION, STREAM_FRAMES,
    STREAM_MALFORMED_FRAMES, STREAM_TTFB,
};
use crate::session_logger::{NoopLogger, SessionLogger};
use crate::sse::{Frame, FrameDecoder};
use crate::store::{self, KeyValueStore};
use crate::types::{ChatCompletionRequest, Message, MessageRole};
use crate::utils::time::now_millis;

/// Where the session is in the request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// No request in flight.
    Idle,
    /// Request dispatched, no response bytes yet.
    Sending,
    /// Response bytes are arriving.
    Streaming,
}

/// How a submission ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The stream ended normally.
    Completed,
    /// The request failed; the error text is also available from [`ChatSession::error`].
    Failed(Error),
    /// The request was superseded or cancelled.
    Cancelled,
}

impl Outcome {
    /// Returns true if the stream ended normally.
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }

    /// Returns true if the request failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Returns true if the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => write!(f, "completed"),
            Outcome::Failed(err) => write!(f, "failed: {err}"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Observer of session state.
///
/// Listeners run while the session's state lock is held, which keeps
/// notifications in mutation order. They must not call back into the session.
pub trait SessionListener: Send + Sync {
    /// Called after every transcript mutation with the whole transcript.
    fn transcript_changed(&self, messages: &[Message]);

    /// Called when the status or the inline error text changes.
    fn status_changed(&self, status: SessionStatus, error: Option<&str>) {
        _ = (status, error);
    }
}

/// Handle returned by [`ChatSession::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Aggregated stats for a chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// The model used for the session.
    pub model: String,
    /// The endpoint requests are sent to.
    pub endpoint: String,
    /// The number of messages in the conversation.
    pub message_count: usize,
    /// Whether an API key is configured.
    pub has_credential: bool,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Requests started since the session was created.
    pub requests_started: u64,
    /// Requests whose stream ended normally.
    pub requests_completed: u64,
    /// Requests that failed.
    pub requests_failed: u64,
    /// Requests that were superseded or cancelled.
    pub requests_cancelled: u64,
}

/// A submitted request.
///
/// Dropping the handle does not cancel the request.
pub struct Submission {
    epoch: String,
    session: ChatSession,
    handle: JoinHandle<Outcome>,
}

impl Submission {
    /// Id of the assistant message this request fills.
    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    /// Waits for the request to finish.
    ///
    /// If the request task panicked, the request is settled as failed so the
    /// session returns to idle with its persisted transcript intact.
    pub async fn settled(self) -> Outcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                let err = Error::streaming(format!("request task ended unexpectedly: {err}"), None);
                self.session.settle(&self.epoch, Outcome::Failed(err))
            }
        }
    }
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

struct ActiveRequest {
    epoch: String,
    user_message: Message,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RequestCounts {
    started: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
}

struct SessionState {
    messages: Vec<Message>,
    credential: String,
    status: SessionStatus,
    error: Option<String>,
    active: Option<ActiveRequest>,
    next_sequence: u64,
    listeners: Vec<(ListenerId, Arc<dyn SessionListener>)>,
    next_listener: u64,
    counts: RequestCounts,
}

impl SessionState {
    fn owns(&self, epoch: &str) -> bool {
        self.active.as_ref().is_some_and(|active| active.epoch == epoch)
    }

    fn fresh_id(&mut self, role: MessageRole, now: i64) -> String {
        loop {
            self.next_sequence += 1;
            let id = format!("{role}-{now}-{}", self.next_sequence);
            if !self.messages.iter().any(|m| m.id == id) {
                return id;
            }
        }
    }

    fn remove_if_empty(&mut self, epoch: &str) -> bool {
        let before = self.messages.len();
        self.messages
            .retain(|m| !(m.id == epoch && m.is_empty_assistant()));
        self.messages.len() != before
    }

    fn notify_transcript(&self) {
        for (_, listener) in &self.listeners {
            listener.transcript_changed(&self.messages);
        }
    }

    fn notify_status(&self) {
        for (_, listener) in &self.listeners {
            listener.status_changed(self.status, self.error.as_deref());
        }
    }
}

struct Inner {
    config: ChatConfig,
    credential_key: String,
    transport: Arc<dyn Transport>,
    store: Arc<dyn KeyValueStore>,
    logger: Arc<dyn SessionLogger>,
    state: Mutex<SessionState>,
}

/// A chat session that manages conversation state and API interactions.
///
/// `ChatSession` is a cheap handle; clones share the same session. Methods that
/// start requests must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

impl ChatSession {
    /// Creates a session, loading the transcript and API key from `store`.
    pub fn new(
        config: ChatConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        Self::with_logger(config, transport, store, Arc::new(NoopLogger))
    }

    /// Creates a session that reports its activity to `logger`.
    pub fn with_logger(
        config: ChatConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        logger: Arc<dyn SessionLogger>,
    ) -> Result<Self> {
        config.validate()?;
        let credential_key = config.credential_key();
        let messages = load_logged(store.as_ref(), logger.as_ref(), config.messages_key());
        let credential = load_logged(store.as_ref(), logger.as_ref(), &credential_key);
        let state = SessionState {
            messages,
            credential,
            status: SessionStatus::Idle,
            error: None,
            active: None,
            next_sequence: 0,
            listeners: Vec::new(),
            next_listener: 0,
            counts: RequestCounts::default(),
        };
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                credential_key,
                transport,
                store,
                logger,
                state: Mutex::new(state),
            }),
        })
    }

    /// Sends `text` as a user message and starts streaming the reply.
    ///
    /// Any request still in flight is cancelled first. The user message and an
    /// empty assistant placeholder are appended and persisted before this
    /// returns; the reply fills the placeholder as it streams in.
    ///
    /// # Errors
    ///
    /// Returns a validation error for blank input and `MissingCredential` when
    /// no API key is set. Neither changes the transcript.
    pub fn submit(&self, text: &str) -> Result<Submission> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::validation(
                "message must not be empty",
                Some("text".to_string()),
            ));
        }

        let mut state = self.lock();
        if state.credential.is_empty() {
            SESSION_MISSING_CREDENTIAL.click();
            let err = Error::missing_credential();
            state.error = Some(err.to_string());
            state.notify_status();
            return Err(err);
        }

        self.cancel_active(&mut state);

        let now = now_millis();
        let user_id = state.fresh_id(MessageRole::User, now);
        let user_message = Message::user(user_id, text, now);
        state.messages.push(user_message.clone());
        self.persist_messages(&state);
        state.notify_transcript();

        let epoch = state.fresh_id(MessageRole::Assistant, now);
        let request = ChatCompletionRequest::streaming(&self.inner.config.model, &state.messages);
        state
            .messages
            .push(Message::assistant_placeholder(epoch.clone(), now));
        self.persist_messages(&state);
        state.notify_transcript();

        let cancel = CancellationToken::new();
        state.active = Some(ActiveRequest {
            epoch: epoch.clone(),
            user_message,
            cancel: cancel.clone(),
        });
        state.status = SessionStatus::Sending;
        state.error = None;
        state.counts.started += 1;
        state.notify_status();
        let credential = state.credential.clone();
        drop(state);

        SESSION_SUBMITS.click();
        let session = self.clone();
        let task_epoch = epoch.clone();
        let handle = tokio::spawn(async move {
            session
                .run_request(task_epoch, request, credential, cancel)
                .await
        });
        Ok(Submission {
            epoch,
            session: self.clone(),
            handle,
        })
    }

    /// Aborts the request in flight, if any.
    ///
    /// The placeholder is removed when nothing has streamed into it yet.
    /// Returns true if a request was cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        let cancelled = self.cancel_active(&mut state);
        if cancelled {
            state.notify_status();
        }
        cancelled
    }

    /// Empties the transcript and persists the empty state.
    ///
    /// An in-flight request is not cancelled; its next increment re-appends the
    /// request's user and assistant messages.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.messages.clear();
        self.persist_messages(&state);
        state.notify_transcript();
    }

    /// Replaces and persists the API key.
    ///
    /// Requests already in flight keep the key they were sent with. An empty
    /// value removes the key.
    pub fn set_credential(&self, value: &str) {
        let mut state = self.lock();
        state.credential = value.trim().to_string();
        if let Err(err) = store::save(
            self.inner.store.as_ref(),
            &self.inner.credential_key,
            &state.credential,
        ) {
            self.report_store_error(&err);
        }
        state.error = None;
        state.notify_status();
    }

    /// Re-reads the transcript and API key from the store.
    ///
    /// Any request in flight is cancelled first. On error the in-memory
    /// transcript and key are left as they were.
    pub fn reload(&self) -> Result<()> {
        let mut state = self.lock();
        self.cancel_active(&mut state);
        let store = self.inner.store.as_ref();
        let messages: Vec<Message> = store::load_or_default(store, self.inner.config.messages_key())?;
        let credential: String = store::load_or_default(store, &self.inner.credential_key)?;
        state.messages = messages;
        state.credential = credential;
        state.error = None;
        state.notify_transcript();
        state.notify_status();
        Ok(())
    }

    /// Registers a listener for transcript and status changes.
    pub fn subscribe(&self, listener: Arc<dyn SessionListener>) -> ListenerId {
        let mut state = self.lock();
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state.listeners.push((id, listener));
        id
    }

    /// Removes a listener; returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(existing, _)| *existing != id);
        state.listeners.len() != before
    }

    /// Returns a copy of the transcript.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Returns the number of messages in the conversation.
    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    /// Returns true if an API key is set.
    pub fn has_credential(&self) -> bool {
        !self.lock().credential.is_empty()
    }

    /// Returns the API key with all but its first and last four characters hidden.
    pub fn masked_credential(&self) -> Option<String> {
        let state = self.lock();
        if state.credential.is_empty() {
            return None;
        }
        let chars: Vec<char> = state.credential.chars().collect();
        if chars.len() <= 8 {
            return Some("*".repeat(chars.len()));
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        Some(format!("{head}{}{tail}", "*".repeat(chars.len() - 8)))
    }

    /// Returns the current lifecycle status.
    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    /// Returns true while a request is in flight.
    pub fn is_busy(&self) -> bool {
        self.status() != SessionStatus::Idle
    }

    /// Returns true while the last message is the assistant message being streamed.
    pub fn is_typing(&self) -> bool {
        let state = self.lock();
        match (&state.active, state.messages.last()) {
            (Some(active), Some(last)) => last.id == active.epoch,
            _ => false,
        }
    }

    /// Returns the epoch of the request in flight.
    pub fn active_epoch(&self) -> Option<String> {
        self.lock().active.as_ref().map(|active| active.epoch.clone())
    }

    /// Returns the inline error text, if any.
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    /// Returns the current session statistics snapshot.
    pub fn stats(&self) -> SessionStats {
        let state = self.lock();
        SessionStats {
            model: self.inner.config.model.clone(),
            endpoint: self.inner.config.endpoint.clone(),
            message_count: state.messages.len(),
            has_credential: !state.credential.is_empty(),
            status: state.status,
            requests_started: state.counts.started,
            requests_completed: state.counts.completed,
            requests_failed: state.counts.failed,
            requests_cancelled: state.counts.cancelled,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_request(
        &self,
        epoch: String,
        request: ChatCompletionRequest,
        credential: String,
        cancel: CancellationToken,
    ) -> Outcome {
        let started = Instant::now();
        self.inner.logger.log_request(&epoch, &request);

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.settle(&epoch, Outcome::Cancelled),
            opened = self.inner.transport.open(&request, &credential) => opened,
        };
        let mut body = match opened {
            Ok(body) => body,
            Err(err) => {
                return self.settle(&epoch, Outcome::Failed(err.into_request_failure()));
            }
        };

        let mut decoder = FrameDecoder::new();
        let mut accumulated = String::new();
        let mut first_byte = true;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.settle(&epoch, Outcome::Cancelled),
                next = body.next() => next,
            };
            if !self.lock().owns(&epoch) {
                return self.settle(&epoch, Outcome::Cancelled);
            }

            let (frames, ended) = match next {
                Some(Ok(bytes)) => {
                    STREAM_BYTES.count(bytes.len() as u64);
                    if first_byte {
                        first_byte = false;
                        STREAM_TTFB.add(started.elapsed().as_secs_f64());
                        self.mark_streaming(&epoch);
                    }
                    (decoder.decode(&bytes), false)
                }
                Some(Err(err)) => {
                    return self.settle(&epoch, Outcome::Failed(err.into_request_failure()));
                }
                None => (decoder.finish(), true),
            };

            for frame in frames {
                match frame {
                    Ok(frame) => {
                        STREAM_FRAMES.click();
                        self.inner.logger.log_frame(&epoch, &frame);
                        if let Frame::Delta(text) = frame {
                            accumulated.push_str(&text);
                            if !self.apply_content(&epoch, &accumulated) {
                                return self.settle(&epoch, Outcome::Cancelled);
                            }
                        }
                    }
                    Err(err) => {
                        STREAM_MALFORMED_FRAMES.click();
                        self.inner.logger.log_malformed_frame(&epoch, &err);
                    }
                }
            }

            if ended || decoder.is_done() {
                break;
            }
        }
        drop(body);
        STREAM_DURATION.add(started.elapsed().as_secs_f64());
        self.settle(&epoch, Outcome::Completed)
    }

    fn mark_streaming(&self, epoch: &str) {
        let mut state = self.lock();
        if state.owns(epoch) && state.status == SessionStatus::Sending {
            state.status = SessionStatus::Streaming;
            state.notify_status();
        }
    }

    /// Replaces the content of the epoch's assistant message with `content`.
    ///
    /// Returns false if the epoch is no longer active.
    fn apply_content(&self, epoch: &str, content: &str) -> bool {
        let mut state = self.lock();
        let Some(active) = state.active.as_ref() else {
            return false;
        };
        if active.epoch != epoch {
            return false;
        }
        let user_message = active.user_message.clone();
        match state.messages.iter_mut().find(|m| m.id == epoch) {
            Some(message) => message.content = content.to_string(),
            None => {
                if !state.messages.iter().any(|m| m.id == user_message.id) {
                    state.messages.push(user_message);
                }
                state.messages.push(Message::new(
                    epoch,
                    MessageRole::Assistant,
                    content,
                    now_millis(),
                ));
            }
        }
        self.persist_messages(&state);
        state.notify_transcript();
        true
    }

    /// Finishes the request for `epoch` and returns the outcome it ended with.
    ///
    /// A request that no longer owns the active epoch was superseded; it ends as
    /// `Cancelled` without touching the session.
    fn settle(&self, epoch: &str, outcome: Outcome) -> Outcome {
        let mut state = self.lock();
        if !state.owns(epoch) {
            return Outcome::Cancelled;
        }
        state.active = None;
        state.status = SessionStatus::Idle;
        match &outcome {
            Outcome::Completed => {
                state.counts.completed += 1;
                SESSION_COMPLETIONS.click();
            }
            Outcome::Failed(err) => {
                state.counts.failed += 1;
                state.error = Some(err.to_string());
                SESSION_FAILURES.click();
            }
            Outcome::Cancelled => {
                state.counts.cancelled += 1;
                SESSION_CANCELLATIONS.click();
            }
        }
        if state.remove_if_empty(epoch) {
            self.persist_messages(&state);
            state.notify_transcript();
        }
        state.notify_status();
        self.inner.logger.log_outcome(epoch, &outcome);
        outcome
    }

    /// Cancels the active request, dropping its placeholder if still empty.
    fn cancel_active(&self, state: &mut SessionState) -> bool {
        let Some(active) = state.active.take() else {
            return false;
        };
        active.cancel.cancel();
        state.status = SessionStatus::Idle;
        state.counts.cancelled += 1;
        SESSION_CANCELLATIONS.click();
        if state.remove_if_empty(&active.epoch) {
            self.persist_messages(state);
            state.notify_transcript();
        }
        self.inner
            .logger
            .log_outcome(&active.epoch, &Outcome::Cancelled);
        true
    }

    fn persist_messages(&self, state: &SessionState) {
        if let Err(err) = store::save(
            self.inner.store.as_ref(),
            self.inner.config.messages_key(),
            &state.messages,
        ) {
            self.report_store_error(&err);
        }
    }

    fn report_store_error(&self, err: &Error) {
        STORE_ERRORS.click();
        self.inner.logger.log_store_error(err);
    }
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ChatSession")
            .field("model", &self.inner.config.model)
            .field("messages", &state.messages.len())
            .field("has_credential", &!state.credential.is_empty())
            .field("status", &state.status)
            .finish_non_exhaustive()
    }
}

fn load_logged<T>(store: &dyn KeyValueStore, logger: &dyn SessionLogger, key: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    match store::load_or_default(store, key) {
        Ok(value) => value,
        Err(err) => {
            STORE_ERRORS.click();
            logger.log_store_error(&err);
            T::default()
        }
    }
}
