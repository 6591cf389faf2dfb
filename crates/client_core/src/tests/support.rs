use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use shared::{domain::ApplicationId, protocol::ProgressSnapshot};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::TransportError,
    transport::{ByteStream, ChatRequest, KycTransport},
};

pub(crate) enum Script {
    Body(Vec<Result<Vec<u8>, TransportError>>),
    Refuse(TransportError),
    Live(ByteStream),
}

/// In-memory backend answering each call with the next queued script.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    chats: Mutex<VecDeque<Script>>,
    statuses: Mutex<VecDeque<Script>>,
    snapshot: Mutex<Option<ProgressSnapshot>>,
    pub(crate) requests: Mutex<Vec<ChatRequest>>,
    pub(crate) status_requests: Mutex<Vec<ApplicationId>>,
}

impl ScriptedTransport {
    pub(crate) async fn push_chat(&self, script: Script) {
        self.chats.lock().await.push_back(script);
    }

    pub(crate) async fn push_status(&self, script: Script) {
        self.statuses.lock().await.push_back(script);
    }

    pub(crate) async fn set_snapshot(&self, snapshot: ProgressSnapshot) {
        *self.snapshot.lock().await = Some(snapshot);
    }

    async fn play(script: Option<Script>) -> Result<ByteStream, TransportError> {
        match script {
            Some(Script::Body(chunks)) => Ok(stream::iter(chunks).boxed()),
            Some(Script::Refuse(err)) => Err(err),
            Some(Script::Live(body)) => Ok(body),
            None => Ok(stream::empty().boxed()),
        }
    }
}

#[async_trait]
impl KycTransport for ScriptedTransport {
    async fn open_chat_stream(&self, request: ChatRequest) -> Result<ByteStream, TransportError> {
        self.requests.lock().await.push(request);
        let script = self.chats.lock().await.pop_front();
        Self::play(script).await
    }

    async fn open_status_stream(
        &self,
        application_id: &ApplicationId,
    ) -> Result<ByteStream, TransportError> {
        self.status_requests.lock().await.push(application_id.clone());
        let script = self.statuses.lock().await.pop_front();
        Self::play(script).await
    }

    async fn fetch_status(&self, _application_id: &ApplicationId) -> Option<ProgressSnapshot> {
        self.snapshot.lock().await.clone()
    }
}

pub(crate) fn frame(event: &str, data: &str) -> Vec<u8> {
    format!("event: {event}\ndata: {data}\n\n").into_bytes()
}

pub(crate) fn body(frames: &[(&str, &str)]) -> Vec<Result<Vec<u8>, TransportError>> {
    frames
        .iter()
        .map(|(event, data)| Ok(frame(event, data)))
        .collect()
}

/// Body fed by hand, for tests that need to interleave reads with other work.
pub(crate) fn live_body() -> (mpsc::Sender<Result<Vec<u8>, TransportError>>, ByteStream) {
    let (tx, rx) = mpsc::channel(8);
    (tx, ReceiverStream::new(rx).boxed())
}

pub(crate) async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
