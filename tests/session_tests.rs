use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use serde_json::json;

use streamchat::chat::{ChatConfig, ChatSession, Outcome, SessionListener, SessionStatus};
use streamchat::{
    ByteStream, ChatCompletionRequest, Error, KeyValueStore, MemoryStore, Message, MessageRole,
    Result, Transport,
};

type Sender = UnboundedSender<Result<Bytes>>;

enum Script {
    Body(ByteStream),
    Fail(Error),
}

#[derive(Default)]
struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<(ChatCompletionRequest, String)>>,
}

impl ScriptedTransport {
    /// Queues a response body fed through the returned sender.
    fn push_body(&self) -> Sender {
        let (tx, rx) = unbounded();
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::Body(Box::pin(rx)));
        tx
    }

    /// Queues a response body made of `chunks`, left open after the last one.
    fn push_chunks(&self, chunks: &[&str]) -> Sender {
        let tx = self.push_body();
        for chunk in chunks {
            send(&tx, chunk);
        }
        tx
    }

    fn push_failure(&self, err: Error) {
        self.scripts.lock().unwrap().push_back(Script::Fail(err));
    }

    fn opened(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> (ChatCompletionRequest, String) {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: &ChatCompletionRequest, credential: &str) -> Result<ByteStream> {
        self.requests
            .lock()
            .unwrap()
            .push((request.clone(), credential.to_string()));
        match self.scripts.lock().unwrap().pop_front() {
            Some(Script::Body(body)) => Ok(body),
            Some(Script::Fail(err)) => Err(err),
            None => Err(Error::request_failed(None, "no scripted response")),
        }
    }
}

#[derive(Default)]
struct RecordingListener {
    transcripts: Mutex<Vec<Vec<Message>>>,
    statuses: Mutex<Vec<(SessionStatus, Option<String>)>>,
}

impl SessionListener for RecordingListener {
    fn transcript_changed(&self, messages: &[Message]) {
        self.transcripts.lock().unwrap().push(messages.to_vec());
    }

    fn status_changed(&self, status: SessionStatus, error: Option<&str>) {
        self.statuses
            .lock()
            .unwrap()
            .push((status, error.map(str::to_string)));
    }
}

fn delta(text: &str) -> String {
    let chunk = json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}],
    });
    format!("data: {chunk}\n\n")
}

const DONE: &str = "data: [DONE]\n\n";

fn send(tx: &Sender, chunk: &str) {
    tx.unbounded_send(Ok(Bytes::from(chunk.to_string())))
        .unwrap();
}

fn setup() -> (ChatSession, Arc<ScriptedTransport>, Arc<MemoryStore>) {
    let transport = Arc::new(ScriptedTransport::default());
    let store = Arc::new(MemoryStore::new());
    let session =
        ChatSession::new(ChatConfig::default(), transport.clone(), store.clone()).unwrap();
    session.set_credential("sk-test");
    (session, transport, store)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

fn contents(session: &ChatSession) -> Vec<(MessageRole, String)> {
    session
        .messages()
        .into_iter()
        .map(|m| (m.role, m.content))
        .collect()
}

#[tokio::test]
async fn deltas_accumulate_into_placeholder() {
    let (session, transport, _) = setup();
    let _tx = transport.push_chunks(&[delta("Hi").as_str(), delta(" there").as_str(), DONE]);

    let submission = session.submit("  Hello  ").unwrap();
    assert_eq!(session.status(), SessionStatus::Sending);
    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].id, submission.epoch());
    assert!(messages[1].is_empty_assistant());

    assert!(submission.settled().await.is_completed());
    assert_eq!(
        contents(&session),
        vec![
            (MessageRole::User, "Hello".to_string()),
            (MessageRole::Assistant, "Hi there".to_string()),
        ]
    );
    assert_eq!(session.status(), SessionStatus::Idle);
    assert!(session.error().is_none());

    let (request, credential) = transport.request(0);
    assert_eq!(credential, "sk-test");
    assert!(request.stream);
    assert_eq!(request.model, "llama-3.1-8b-instant");
    assert_eq!(request.messages.len(), 1);
    assert_eq!(request.messages[0].role, MessageRole::User);
    assert_eq!(request.messages[0].content, "Hello");
}

#[tokio::test]
async fn frames_split_across_reads() {
    let (session, transport, _) = setup();
    let frame = delta("héllo 😀");
    let bytes = frame.as_bytes();
    let tx = transport.push_body();
    let submission = session.submit("split").unwrap();
    for piece in bytes.chunks(3) {
        tx.unbounded_send(Ok(Bytes::copy_from_slice(piece))).unwrap();
    }
    send(&tx, DONE);

    assert!(submission.settled().await.is_completed());
    assert_eq!(session.messages()[1].content, "héllo 😀");
}

#[tokio::test]
async fn request_carries_prior_history() {
    let (session, transport, _) = setup();
    let _first = transport.push_chunks(&[delta("One").as_str(), DONE]);
    let _second = transport.push_chunks(&[delta("Two").as_str(), DONE]);

    assert!(session.submit("first").unwrap().settled().await.is_completed());
    assert!(session.submit("second").unwrap().settled().await.is_completed());

    let (request, _) = transport.request(1);
    let sent: Vec<_> = request
        .messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        sent,
        vec![
            (MessageRole::User, "first"),
            (MessageRole::Assistant, "One"),
            (MessageRole::User, "second"),
        ]
    );
    assert_eq!(session.message_count(), 4);
}

#[tokio::test]
async fn resubmit_cancels_previous_request() {
    let (session, transport, _) = setup();
    let first_tx = transport.push_body();
    let _second_tx = transport.push_chunks(&[delta("Second").as_str(), DONE]);

    let first = session.submit("one").unwrap();
    wait_for(|| transport.opened() == 1).await;
    let second = session.submit("two").unwrap();

    // Bytes for the superseded request must never reach the transcript.
    let _ = first_tx.unbounded_send(Ok(Bytes::from(delta("stale"))));

    assert!(first.settled().await.is_cancelled());
    assert!(second.settled().await.is_completed());
    assert!(first_tx.is_closed());

    let messages = session.messages();
    let assistants: Vec<_> = messages
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .collect();
    assert_eq!(assistants.len(), 1);
    assert_eq!(assistants[0].content, "Second");
    assert_eq!(
        contents(&session),
        vec![
            (MessageRole::User, "one".to_string()),
            (MessageRole::User, "two".to_string()),
            (MessageRole::Assistant, "Second".to_string()),
        ]
    );
    let stats = session.stats();
    assert_eq!(stats.requests_started, 2);
    assert_eq!(stats.requests_completed, 1);
    assert_eq!(stats.requests_cancelled, 1);
}

#[tokio::test]
async fn http_failure_sets_error_and_drops_placeholder() {
    let (session, transport, _) = setup();
    transport.push_failure(Error::request_failed(Some(401), "invalid api key"));

    let outcome = session.submit("Hello").unwrap().settled().await;
    match outcome {
        Outcome::Failed(err) => assert_eq!(err.status_code(), Some(401)),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(
        session.error().as_deref(),
        Some("Request failed (HTTP 401): invalid api key")
    );
    assert_eq!(
        contents(&session),
        vec![(MessageRole::User, "Hello".to_string())]
    );
    assert_eq!(session.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn failure_after_partial_content_keeps_text() {
    let (session, transport, _) = setup();
    let tx = transport.push_chunks(&[delta("Partial").as_str()]);

    let submission = session.submit("Hello").unwrap();
    wait_for(|| session.messages().last().is_some_and(|m| m.content == "Partial")).await;
    tx.unbounded_send(Err(Error::streaming("connection reset", None)))
        .unwrap();

    assert!(submission.settled().await.is_failed());
    assert_eq!(session.messages()[1].content, "Partial");
    let error = session.error().unwrap();
    assert!(error.starts_with("Request failed"), "{error}");
    assert!(error.contains("connection reset"), "{error}");
}

#[tokio::test]
async fn malformed_frame_is_skipped() {
    let (session, transport, _) = setup();
    let _tx = transport.push_chunks(&[
        delta("Hi").as_str(),
        "data: {not json}\n\n",
        delta(" there").as_str(),
        DONE,
    ]);

    assert!(session.submit("Hello").unwrap().settled().await.is_completed());
    assert_eq!(session.messages()[1].content, "Hi there");
    assert!(session.error().is_none());
}

#[tokio::test]
async fn done_ends_stream_even_if_body_stays_open() {
    let (session, transport, _) = setup();
    let body = format!("{}{DONE}{}", delta("Hi"), delta("ignored"));
    let tx = transport.push_chunks(&[body.as_str()]);

    assert!(session.submit("Hello").unwrap().settled().await.is_completed());
    assert_eq!(session.messages()[1].content, "Hi");
    assert!(tx.is_closed());
}

#[tokio::test]
async fn body_end_without_done_completes() {
    let (session, transport, _) = setup();
    let tx = transport.push_chunks(&[delta("Hi").as_str(), delta(" there").trim_end()]);
    drop(tx);

    assert!(session.submit("Hello").unwrap().settled().await.is_completed());
    assert_eq!(session.messages()[1].content, "Hi there");
}

#[tokio::test]
async fn empty_completion_drops_placeholder() {
    let (session, transport, _) = setup();
    let _tx = transport.push_chunks(&[DONE]);

    assert!(session.submit("Hello").unwrap().settled().await.is_completed());
    assert_eq!(
        contents(&session),
        vec![(MessageRole::User, "Hello".to_string())]
    );
}

#[tokio::test]
async fn missing_credential_leaves_transcript_untouched() {
    let transport = Arc::new(ScriptedTransport::default());
    let session = ChatSession::new(
        ChatConfig::default(),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let err = session.submit("Hello").unwrap_err();
    assert!(err.is_missing_credential());
    assert_eq!(session.message_count(), 0);
    assert_eq!(
        session.error().as_deref(),
        Some("Please enter your API key first")
    );
    assert_eq!(transport.opened(), 0);
}

#[tokio::test]
async fn cancel_stops_stream_and_drops_empty_placeholder() {
    let (session, transport, _) = setup();
    let tx = transport.push_body();

    let submission = session.submit("Hello").unwrap();
    wait_for(|| transport.opened() == 1).await;
    assert!(session.cancel());
    assert!(!session.cancel());

    assert!(submission.settled().await.is_cancelled());
    assert!(tx.is_closed());
    assert_eq!(
        contents(&session),
        vec![(MessageRole::User, "Hello".to_string())]
    );
    assert_eq!(session.status(), SessionStatus::Idle);
    assert!(session.error().is_none());
}

#[tokio::test]
async fn cancel_keeps_partial_reply() {
    let (session, transport, _) = setup();
    let _tx = transport.push_chunks(&[delta("Half").as_str()]);

    let submission = session.submit("Hello").unwrap();
    wait_for(|| session.messages().last().is_some_and(|m| m.content == "Half")).await;
    assert!(session.cancel());

    assert!(submission.settled().await.is_cancelled());
    assert_eq!(session.messages()[1].content, "Half");
}

#[tokio::test]
async fn clear_during_stream_reappends_messages() {
    let (session, transport, _) = setup();
    let tx = transport.push_chunks(&[delta("Hi").as_str()]);

    let submission = session.submit("Hello").unwrap();
    wait_for(|| session.messages().last().is_some_and(|m| m.content == "Hi")).await;
    session.clear();
    assert_eq!(session.message_count(), 0);

    send(&tx, delta(" there").as_str());
    send(&tx, DONE);
    assert!(submission.settled().await.is_completed());
    assert_eq!(
        contents(&session),
        vec![
            (MessageRole::User, "Hello".to_string()),
            (MessageRole::Assistant, "Hi there".to_string()),
        ]
    );
}

#[tokio::test]
async fn listeners_observe_transcript_and_status() {
    let (session, transport, _) = setup();
    let listener = Arc::new(RecordingListener::default());
    let id = session.subscribe(listener.clone());
    let _tx = transport.push_chunks(&[delta("Hi").as_str(), delta(" there").as_str(), DONE]);

    assert!(session.submit("Hello").unwrap().settled().await.is_completed());

    let replies: Vec<String> = listener
        .transcripts
        .lock()
        .unwrap()
        .iter()
        .filter_map(|t| t.last())
        .filter(|m| m.role == MessageRole::Assistant)
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(replies, vec!["", "Hi", "Hi there"]);

    let statuses: Vec<SessionStatus> = listener
        .statuses
        .lock()
        .unwrap()
        .iter()
        .map(|(status, _)| *status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            SessionStatus::Sending,
            SessionStatus::Streaming,
            SessionStatus::Idle,
        ]
    );

    assert!(session.unsubscribe(id));
    let seen = listener.transcripts.lock().unwrap().len();
    session.clear();
    assert_eq!(listener.transcripts.lock().unwrap().len(), seen);
}

#[tokio::test]
async fn transcript_persists_and_reloads() {
    let (session, transport, store) = setup();
    let _tx = transport.push_chunks(&[delta("Hi there").as_str(), DONE]);
    assert!(session.submit("Hello").unwrap().settled().await.is_completed());

    let stored = store.get("chat-messages").unwrap().unwrap();
    let stored: Vec<Message> = serde_json::from_value(stored).unwrap();
    assert_eq!(stored, session.messages());
    assert_eq!(store.get("groq-api-key").unwrap(), Some(json!("sk-test")));

    let restored = ChatSession::new(
        ChatConfig::default(),
        Arc::new(ScriptedTransport::default()),
        store.clone(),
    )
    .unwrap();
    assert_eq!(restored.messages(), session.messages());
    assert!(restored.has_credential());

    store.set("chat-messages", json!([])).unwrap();
    restored.reload().unwrap();
    assert_eq!(restored.message_count(), 0);

    store.set("chat-messages", json!(42)).unwrap();
    assert!(restored.reload().is_err());
}
