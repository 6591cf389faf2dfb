use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use client_core::{
    ByteStream, ChatRequest, KycSession, KycTransport, PendingFile, SessionConfig, TransportError,
};
use futures::{stream, StreamExt};
use shared::{
    domain::{ActionKind, ApplicationId, Role, UserId},
    protocol::ProgressSnapshot,
};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

type Chunk = Result<Vec<u8>, TransportError>;

/// Serves one prepared chat body and records the request that opened it.
struct ReplayTransport {
    body: Mutex<Option<ByteStream>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ReplayTransport {
    fn new(body: ByteStream) -> Arc<Self> {
        Arc::new(Self {
            body: Mutex::new(Some(body)),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl KycTransport for ReplayTransport {
    async fn open_chat_stream(&self, request: ChatRequest) -> Result<ByteStream, TransportError> {
        self.requests.lock().await.push(request);
        Ok(self
            .body
            .lock()
            .await
            .take()
            .unwrap_or_else(|| stream::empty().boxed()))
    }

    async fn open_status_stream(
        &self,
        _application_id: &ApplicationId,
    ) -> Result<ByteStream, TransportError> {
        Ok(stream::empty().boxed())
    }

    async fn fetch_status(&self, _application_id: &ApplicationId) -> Option<ProgressSnapshot> {
        None
    }
}

fn frame(event: &str, data: &str) -> Chunk {
    Ok(format!("event: {event}\ndata: {data}\n\n").into_bytes())
}

#[tokio::test]
async fn file_only_message_yields_confirmation_prompt() -> anyhow::Result<()> {
    let transport = ReplayTransport::new(
        stream::iter(vec![
            frame("session", r#"{"session_id":"kyc-session-1-abcdefg"}"#),
            frame("text", r#"{"text":"Please confirm:"}"#),
            frame(
                "text",
                r#"{"text":"[UI_ACTION:{\"type\":\"confirm_data\",\"title\":\"Confirm\",\"data\":{\"name\":\"A\"}}]"}"#,
            ),
            frame("stop", r#"{"reason":"done"}"#),
        ])
        .boxed(),
    );
    let session = KycSession::new(transport.clone(), SessionConfig::default());
    session.init_session(UserId::from("user-1")).await;

    session
        .send_message(
            "",
            vec![PendingFile::new("id.png", vec![1, 2, 3]).with_mime_type("image/png")],
            Vec::new(),
        )
        .await?;

    let state = session.state().await;
    let assistant: Vec<_> = state
        .messages
        .iter()
        .filter(|message| message.role == Role::Assistant)
        .collect();
    assert_eq!(assistant.len(), 1);
    assert_eq!(assistant[0].content, "Please confirm:");

    let pending = state.pending_action.expect("pending action");
    let ActionKind::ConfirmData { data, .. } = &pending.action.kind else {
        panic!("expected confirm_data, got {:?}", pending.action.kind);
    };
    assert_eq!(data["name"], "A");

    let requests = transport.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].message, "");
    assert_eq!(requests[0].documents[0].filename, "id.png");
    Ok(())
}

#[tokio::test]
async fn text_deltas_buffer_while_the_exchange_is_open() -> anyhow::Result<()> {
    let (feed, rx) = mpsc::channel::<Chunk>(8);
    let transport = ReplayTransport::new(ReceiverStream::new(rx).boxed());
    let session = Arc::new(KycSession::new(transport, SessionConfig::default()));
    session.init_session(UserId::from("user-1")).await;

    let exchange = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.send_message("hi", Vec::new(), Vec::new()).await }
    });

    feed.send(frame("text", r#"{"text":"Hello"}"#)).await?;
    feed.send(frame("text", r#"{"text":" world"}"#)).await?;

    let mut buffered = String::new();
    for _ in 0..200 {
        buffered = session.state().await.streaming_text;
        if buffered == "Hello world" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(buffered, "Hello world");
    assert!(session.state().await.is_streaming);
    assert_eq!(session.display_text().await, "Hello world");

    feed.send(frame("stop", r#"{"reason":"end_turn"}"#)).await?;
    drop(feed);
    tokio::time::timeout(Duration::from_secs(2), exchange).await???;

    let state = session.state().await;
    assert!(!state.is_streaming);
    assert!(state.streaming_text.is_empty());
    assert_eq!(
        state.messages.last().map(|message| message.content.as_str()),
        Some("Hello world")
    );
    Ok(())
}
