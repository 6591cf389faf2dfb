use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use futures::StreamExt;
use shared::{
    domain::ApplicationId,
    protocol::{ProgressSnapshot, SseFrame, StatusFrame},
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{sse::SseDecoder, transport::KycTransport};

#[async_trait]
pub trait StatusListener: Send + Sync {
    async fn on_status(&self, snapshot: ProgressSnapshot);
    async fn on_error(&self, message: String);
    async fn on_complete(&self);
}

/// Handle to a live status stream. Cancellation is cooperative: a read
/// already in flight finishes, but nothing it yields is dispatched.
pub struct Subscription {
    application_id: ApplicationId,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn application_id(&self) -> &ApplicationId {
        &self.application_id
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!(application_id = %self.application_id, "subscription: cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the read loop to exit.
    pub async fn finished(self) {
        let _ = self.task.await;
    }
}

#[derive(Clone)]
pub struct StatusSubscriber {
    transport: Arc<dyn KycTransport>,
}

impl StatusSubscriber {
    pub fn new(transport: Arc<dyn KycTransport>) -> Self {
        Self { transport }
    }

    pub fn subscribe(
        &self,
        application_id: ApplicationId,
        listener: Arc<dyn StatusListener>,
    ) -> Subscription {
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_subscription(
            Arc::clone(&self.transport),
            application_id.clone(),
            listener,
            Arc::clone(&cancelled),
        ));
        Subscription {
            application_id,
            cancelled,
            task,
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

async fn run_subscription(
    transport: Arc<dyn KycTransport>,
    application_id: ApplicationId,
    listener: Arc<dyn StatusListener>,
    cancelled: Arc<AtomicBool>,
) {
    let is_cancelled = || cancelled.load(Ordering::SeqCst);

    let mut body = match transport.open_status_stream(&application_id).await {
        Ok(body) => body,
        Err(err) => {
            warn!(application_id = %application_id, error = %err, "subscription: stream refused");
            if !is_cancelled() {
                listener.on_error(err.user_message()).await;
            }
            return;
        }
    };

    let mut decoder = SseDecoder::new();
    loop {
        if is_cancelled() {
            return;
        }
        let Some(chunk) = body.next().await else {
            if let Some(frame) = decoder.flush() {
                if let Flow::Stop = dispatch(&frame, listener.as_ref(), &cancelled).await {
                    return;
                }
            }
            if !is_cancelled() {
                listener.on_complete().await;
            }
            return;
        };

        match chunk {
            Ok(bytes) => {
                for frame in decoder.push_bytes(&bytes) {
                    if let Flow::Stop = dispatch(&frame, listener.as_ref(), &cancelled).await {
                        return;
                    }
                }
            }
            Err(err) => {
                warn!(application_id = %application_id, error = %err, "subscription: read failed");
                if !is_cancelled() {
                    listener.on_error(err.to_string()).await;
                }
                return;
            }
        }
    }
}

async fn dispatch(frame: &SseFrame, listener: &dyn StatusListener, cancelled: &AtomicBool) -> Flow {
    if cancelled.load(Ordering::SeqCst) {
        debug!(event = %frame.event, "subscription: dropping frame after cancel");
        return Flow::Stop;
    }
    match StatusFrame::decode(frame) {
        Ok(StatusFrame::Init(snapshot) | StatusFrame::Progress(snapshot)) => {
            listener.on_status(snapshot).await;
        }
        Ok(StatusFrame::StageUpdate(update)) => {
            if let Some(current_stage) = update.current_stage {
                listener
                    .on_status(ProgressSnapshot::partial(current_stage))
                    .await;
            }
        }
        Ok(StatusFrame::Complete) => {
            listener.on_complete().await;
            return Flow::Stop;
        }
        Err(err) if err.is_unknown_frame() => {
            debug!(event = %frame.event, "subscription: ignoring unknown frame");
        }
        Err(err) => {
            warn!(event = %frame.event, error = %err, "subscription: dropping malformed frame");
        }
    }
    Flow::Continue
}

#[cfg(test)]
#[path = "tests/subscription_tests.rs"]
mod tests;
