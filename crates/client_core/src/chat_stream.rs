use std::sync::Arc;

use futures::StreamExt;
use shared::{
    domain::SessionId,
    protocol::{ChatFrame, ProgressSnapshot, SseFrame},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    error::TransportError,
    sse::SseDecoder,
    transport::{ChatRequest, KycTransport},
};

const EVENT_BUFFER: usize = 64;

pub type ChatEventStream = ReceiverStream<ChatEvent>;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    SessionStarted(SessionId),
    TextDelta(String),
    ToolCallStarted {
        tool_name: String,
        tool_id: String,
    },
    ToolResult {
        tool_id: String,
        success: bool,
    },
    DocumentUploaded {
        filename: String,
        document_type: Option<String>,
        success: bool,
        error: Option<String>,
    },
    Progress(ProgressSnapshot),
    Stop(String),
    Warning(String),
    /// An `error` frame sent by the backend inside the stream.
    ServerError(String),
    Complete,
    Failed(String),
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Complete | ChatEvent::Failed(_))
    }
}

impl From<ChatFrame> for ChatEvent {
    fn from(frame: ChatFrame) -> Self {
        match frame {
            ChatFrame::Session(frame) => ChatEvent::SessionStarted(SessionId(frame.session_id)),
            ChatFrame::Text(frame) => ChatEvent::TextDelta(frame.text),
            ChatFrame::ToolCall(frame) => ChatEvent::ToolCallStarted {
                tool_name: frame.tool_name,
                tool_id: frame.tool_id,
            },
            ChatFrame::ToolResult(frame) => ChatEvent::ToolResult {
                tool_id: frame.tool_id,
                success: frame.success,
            },
            ChatFrame::DocumentUploaded(frame) => ChatEvent::DocumentUploaded {
                filename: frame.filename,
                document_type: frame.document_type,
                success: frame.success,
                error: frame.error,
            },
            ChatFrame::Progress(snapshot) => ChatEvent::Progress(snapshot),
            ChatFrame::Stop(frame) => ChatEvent::Stop(frame.reason),
            ChatFrame::Warning(frame) => ChatEvent::Warning(frame.message),
            ChatFrame::Error(message) => ChatEvent::ServerError(message),
        }
    }
}

/// Whether a request-level failure looks like the stream simply ending.
///
/// Substring matching on error text cannot tell a dropped connection from a
/// server that closed the body early; both read as completion.
pub fn is_benign_termination(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("network") || message.contains("aborted")
}

#[derive(Debug, Default)]
pub struct ChatExchange {
    decoder: SseDecoder,
    finished: bool,
}

impl ChatExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ChatEvent> {
        if self.finished {
            return Vec::new();
        }
        self.decoder
            .push_bytes(chunk)
            .iter()
            .filter_map(translate)
            .collect()
    }

    /// Flushes any trailing frame and completes.
    pub fn finish(&mut self) -> Vec<ChatEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut events: Vec<ChatEvent> = self.decoder.flush().iter().filter_map(translate).collect();
        events.push(ChatEvent::Complete);
        events
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Vec<ChatEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![ChatEvent::Failed(message.into())]
    }

    pub fn abort(&mut self, error: &TransportError) -> Vec<ChatEvent> {
        match error {
            TransportError::Status { .. } => self.fail(error.user_message()),
            TransportError::Read(_) => self.finish(),
            other => {
                let message = other.to_string();
                if is_benign_termination(&message) {
                    self.finish()
                } else {
                    self.fail(message)
                }
            }
        }
    }
}

fn translate(frame: &SseFrame) -> Option<ChatEvent> {
    match ChatFrame::decode(frame) {
        Ok(frame) => Some(frame.into()),
        Err(err) if err.is_unknown_frame() => {
            debug!(event = %frame.event, "chat: ignoring unknown frame");
            None
        }
        Err(err) => {
            warn!(event = %frame.event, error = %err, "chat: dropping malformed frame");
            None
        }
    }
}

#[derive(Clone)]
pub struct ChatStreamClient {
    transport: Arc<dyn KycTransport>,
}

impl ChatStreamClient {
    pub fn new(transport: Arc<dyn KycTransport>) -> Self {
        Self { transport }
    }

    pub fn send(&self, request: ChatRequest) -> ChatEventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let transport = Arc::clone(&self.transport);
        tokio::spawn(run_exchange(transport, request, tx));
        ReceiverStream::new(rx)
    }
}

async fn run_exchange(
    transport: Arc<dyn KycTransport>,
    request: ChatRequest,
    tx: mpsc::Sender<ChatEvent>,
) {
    let session_id = request.session_id.clone();
    let mut exchange = ChatExchange::new();

    let mut body = match transport.open_chat_stream(request).await {
        Ok(body) => body,
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "chat: request failed");
            deliver(&tx, exchange.abort(&err)).await;
            return;
        }
    };

    while let Some(chunk) = body.next().await {
        let events = match chunk {
            Ok(bytes) => exchange.feed(&bytes),
            Err(err) => {
                info!(session_id = %session_id, error = %err, "chat: stream ended abruptly");
                exchange.abort(&err)
            }
        };
        if !deliver(&tx, events).await {
            debug!(session_id = %session_id, "chat: receiver dropped");
            return;
        }
        if exchange.is_finished() {
            return;
        }
    }

    deliver(&tx, exchange.finish()).await;
}

async fn deliver(tx: &mpsc::Sender<ChatEvent>, events: Vec<ChatEvent>) -> bool {
    for event in events {
        if tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
#[path = "tests/chat_stream_tests.rs"]
mod tests;
