use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use shared::{
    domain::{Action, ApplicationId, CanonicalStage, Message, Role, SessionId, UserId},
    protocol::{ProgressSnapshot, StageRecord},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    action::{parse_ui_action, strip_ui_action},
    chat_stream::{ChatEvent, ChatStreamClient},
    config::ClientSettings,
    error::SessionError,
    progress::{highest_stage_reached, merge_with_floor, StageView, Verdict},
    subscription::{StatusListener, StatusSubscriber, Subscription},
    transport::{ChatRequest, KycTransport, UploadDocument},
};

const IDLE_STATUS: &str = "idle";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub opening_message: String,
    /// Shown in history instead of the opening message actually sent.
    pub opening_display_message: String,
    pub upload_message: String,
    pub confirm_message: String,
    pub reuse_session_ids: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for SessionConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            opening_message: settings.opening_message.clone(),
            opening_display_message: settings.opening_display_message.clone(),
            upload_message: settings.upload_message.clone(),
            confirm_message: settings.confirm_message.clone(),
            reuse_session_ids: settings.reuse_session_ids,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
    pub document_type: Option<String>,
}

impl PendingFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: None,
            bytes,
            document_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    fn into_upload(self) -> UploadDocument {
        UploadDocument {
            filename: self.filename,
            mime_type: self.mime_type,
            bytes: self.bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub id: String,
    pub action: Action,
}

impl PendingAction {
    fn new(action: Action) -> Self {
        Self {
            id: format!("action-{}", Utc::now().timestamp_millis()),
            action,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: Option<SessionId>,
    pub application_id: Option<ApplicationId>,
    pub user_id: Option<UserId>,
    pub messages: Vec<Message>,
    pub is_streaming: bool,
    /// Assistant text of the exchange in flight; never part of history.
    pub streaming_text: String,
    pub overall_status: String,
    pub current_stage: Option<String>,
    pub stage_reports: Vec<StageRecord>,
    /// Furthest canonical stage seen; never moves backwards.
    pub highest_stage: Option<CanonicalStage>,
    pub pending_action: Option<PendingAction>,
    pub extracted_data: Option<Map<String, Value>>,
    pub pending_files: Vec<PendingFile>,
    pub verdict: Option<Verdict>,
    pub status_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session_id: None,
            application_id: None,
            user_id: None,
            messages: Vec::new(),
            is_streaming: false,
            streaming_text: String::new(),
            overall_status: IDLE_STATUS.to_string(),
            current_stage: None,
            stage_reports: Vec::new(),
            highest_stage: None,
            pending_action: None,
            extracted_data: None,
            pending_files: Vec::new(),
            verdict: None,
            status_error: None,
        }
    }
}

impl SessionState {
    pub fn stages(&self) -> Vec<StageView> {
        merge_with_floor(
            &self.stage_reports,
            self.current_stage.as_deref(),
            &self.overall_status,
            self.highest_stage,
        )
    }

    fn finalize_stream(&mut self) {
        let text = std::mem::take(&mut self.streaming_text);
        if text.trim().is_empty() {
            return;
        }

        let parsed = parse_ui_action(&text);
        if let Some(action) = &parsed.action {
            if let Some(data) = action.extracted_data() {
                self.extracted_data = Some(data.clone());
            }
            self.pending_action = Some(PendingAction::new(action.clone()));
        }
        self.messages
            .push(Message::new(Role::Assistant, parsed.text, parsed.action));
    }

    fn end_stream(&mut self) {
        self.finalize_stream();
        self.is_streaming = false;
    }

    fn apply_snapshot(&mut self, snapshot: ProgressSnapshot) {
        if snapshot.is_partial() {
            self.current_stage = snapshot.current_stage;
        } else {
            if let Some(application_id) = snapshot.application_id() {
                self.application_id = Some(application_id);
            }
            self.overall_status = snapshot.status;
            self.current_stage = snapshot.current_stage;
            self.stage_reports = snapshot.stages;

            if let Some(verdict) = Verdict::from_status(&self.overall_status) {
                if self.verdict != Some(verdict) {
                    info!(?verdict, status = %self.overall_status, "session: verdict reached");
                }
                self.verdict = Some(verdict);
            }
        }

        let reached = highest_stage_reached(&self.stage_reports, self.current_stage.as_deref());
        self.highest_stage = self.highest_stage.max(reached);
    }
}

/// Errors that usually mean the stream was cut short rather than refused.
fn is_quiet_error(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["network", "aborted", "incomplete"]
        .iter()
        .any(|needle| message.contains(needle))
}

#[derive(Debug, Default)]
pub struct SessionIdRegistry {
    ids: Mutex<HashMap<UserId, SessionId>>,
}

impl SessionIdRegistry {
    pub async fn session_id_for(&self, user_id: &UserId, reuse: bool) -> SessionId {
        let mut ids = self.ids.lock().await;
        if reuse {
            if let Some(existing) = ids.get(user_id) {
                return existing.clone();
            }
        }
        let fresh = SessionId::generate();
        ids.insert(user_id.clone(), fresh.clone());
        fresh
    }

    pub async fn forget(&self, user_id: &UserId) {
        self.ids.lock().await.remove(user_id);
    }
}

struct SessionStatusListener {
    state: Arc<Mutex<SessionState>>,
    generation: Arc<AtomicU64>,
    issued: u64,
}

impl SessionStatusListener {
    /// Only meaningful while the state lock is held.
    fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.issued
    }
}

#[async_trait]
impl StatusListener for SessionStatusListener {
    async fn on_status(&self, snapshot: ProgressSnapshot) {
        let mut state = self.state.lock().await;
        if !self.is_current() {
            debug!(generation = self.issued, "session: dropping status from replaced subscription");
            return;
        }
        state.apply_snapshot(snapshot);
    }

    async fn on_error(&self, message: String) {
        let mut state = self.state.lock().await;
        if !self.is_current() {
            debug!(error = %message, "session: dropping error from replaced subscription");
            return;
        }
        warn!(error = %message, "session: status subscription failed");
        state.status_error = Some(message);
    }

    async fn on_complete(&self) {
        info!("session: status stream complete");
    }
}

pub struct KycSession {
    transport: Arc<dyn KycTransport>,
    chat: ChatStreamClient,
    subscriber: StatusSubscriber,
    config: SessionConfig,
    session_ids: Arc<SessionIdRegistry>,
    state: Arc<Mutex<SessionState>>,
    subscription: Mutex<Option<Subscription>>,
    /// Bumped under the state lock whenever the live subscription changes.
    status_generation: Arc<AtomicU64>,
}

impl KycSession {
    pub fn new(transport: Arc<dyn KycTransport>, config: SessionConfig) -> Self {
        Self::with_registry(transport, config, Arc::new(SessionIdRegistry::default()))
    }

    pub fn with_registry(
        transport: Arc<dyn KycTransport>,
        config: SessionConfig,
        session_ids: Arc<SessionIdRegistry>,
    ) -> Self {
        Self {
            chat: ChatStreamClient::new(Arc::clone(&transport)),
            subscriber: StatusSubscriber::new(Arc::clone(&transport)),
            transport,
            config,
            session_ids,
            state: Arc::new(Mutex::new(SessionState::default())),
            subscription: Mutex::new(None),
            status_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    pub async fn display_text(&self) -> String {
        strip_ui_action(&self.state.lock().await.streaming_text)
    }

    pub async fn stages(&self) -> Vec<StageView> {
        self.state.lock().await.stages()
    }

    pub async fn init_session(&self, user_id: UserId) -> SessionId {
        let session_id = self
            .session_ids
            .session_id_for(&user_id, self.config.reuse_session_ids)
            .await;
        info!(session_id = %session_id, user_id = %user_id, "session: initialized");

        let mut state = self.state.lock().await;
        let pending_files = std::mem::take(&mut state.pending_files);
        *state = SessionState {
            session_id: Some(session_id.clone()),
            user_id: Some(user_id),
            pending_files,
            ..SessionState::default()
        };
        session_id
    }

    pub async fn start_verification(&self) -> Result<(), SessionError> {
        if self.state.lock().await.user_id.is_none() {
            return Err(SessionError::NotInitialized);
        }
        self.exchange(
            &self.config.opening_display_message,
            self.config.opening_message.clone(),
            Vec::new(),
            Vec::new(),
        )
        .await
    }

    /// Empty text still goes out but adds no user message.
    pub async fn send_message(
        &self,
        text: &str,
        files: Vec<PendingFile>,
        file_types: Vec<String>,
    ) -> Result<(), SessionError> {
        self.exchange(text, text.to_string(), files, file_types).await
    }

    pub async fn finalize_stream(&self) {
        self.state.lock().await.finalize_stream();
    }

    pub async fn approve_action(&self) -> Result<(), SessionError> {
        let files = {
            let mut state = self.state.lock().await;
            if state.session_id.is_none() {
                return Err(SessionError::NotInitialized);
            }
            if state.pending_files.is_empty() {
                return Err(SessionError::NoPendingFiles);
            }
            state.pending_action = None;
            std::mem::take(&mut state.pending_files)
        };
        let document_types = files
            .iter()
            .map(|file| file.document_type.clone())
            .collect::<Option<Vec<_>>>()
            .unwrap_or_default();

        self.exchange(
            &self.config.upload_message,
            self.config.upload_message.clone(),
            files,
            document_types,
        )
        .await
    }

    pub async fn confirm_action(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().await;
            if state.session_id.is_none() {
                return Err(SessionError::NotInitialized);
            }
            state.pending_action = None;
        }
        self.exchange(
            &self.config.confirm_message,
            self.config.confirm_message.clone(),
            Vec::new(),
            Vec::new(),
        )
        .await
    }

    pub async fn add_pending_file(&self, file: PendingFile) {
        self.state.lock().await.pending_files.push(file);
    }

    pub async fn remove_pending_file(&self, filename: &str) -> bool {
        let mut state = self.state.lock().await;
        let before = state.pending_files.len();
        state.pending_files.retain(|file| file.filename != filename);
        state.pending_files.len() != before
    }

    pub async fn clear_pending_files(&self) {
        self.state.lock().await.pending_files.clear();
    }

    /// Replaces any live subscription with one for `application_id`.
    pub async fn subscribe_to_status(&self, application_id: ApplicationId) {
        let mut slot = self.subscription.lock().await;
        self.replace_subscription(&mut slot, application_id).await;
    }

    pub async fn unsubscribe(&self) {
        if let Some(subscription) = self.subscription.lock().await.take() {
            subscription.cancel();
        }
        let _state = self.state.lock().await;
        self.status_generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Cancels the subscription, clears all state and forgets the session id.
    pub async fn reset(&self) {
        self.unsubscribe().await;
        let mut state = self.state.lock().await;
        if let Some(user_id) = state.user_id.take() {
            self.session_ids.forget(&user_id).await;
        }
        *state = SessionState::default();
        info!("session: reset");
    }

    pub async fn refresh_status(&self) -> Result<bool, SessionError> {
        let application_id = self
            .state
            .lock()
            .await
            .application_id
            .clone()
            .ok_or(SessionError::NoApplication)?;

        match self.transport.fetch_status(&application_id).await {
            Some(snapshot) => {
                self.state.lock().await.apply_snapshot(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn drive<S>(&self, mut events: S)
    where
        S: Stream<Item = ChatEvent> + Unpin,
    {
        while let Some(event) = events.next().await {
            self.apply_event(event).await;
        }
    }

    pub async fn apply_event(&self, event: ChatEvent) {
        let mut subscribe_to = None;
        {
            let mut state = self.state.lock().await;
            match event {
                ChatEvent::SessionStarted(session_id) => state.session_id = Some(session_id),
                ChatEvent::TextDelta(text) => state.streaming_text.push_str(&text),
                ChatEvent::ToolCallStarted { tool_name, tool_id } => {
                    info!(tool_name = %tool_name, tool_id = %tool_id, "session: tool called");
                }
                ChatEvent::ToolResult { tool_id, success } => {
                    info!(tool_id = %tool_id, success, "session: tool finished");
                    if state
                        .pending_action
                        .as_ref()
                        .is_some_and(|pending| pending.id == tool_id)
                    {
                        state.pending_action = None;
                    }
                }
                ChatEvent::DocumentUploaded {
                    filename,
                    success,
                    error,
                    ..
                } => {
                    if !success {
                        let reason = error.unwrap_or_else(|| "Unknown error".to_string());
                        state.messages.push(Message::system(format!(
                            "Failed to upload \"{filename}\": {reason}"
                        )));
                    }
                }
                ChatEvent::Progress(snapshot) => {
                    subscribe_to = snapshot.application_id();
                    state.apply_snapshot(snapshot);
                }
                ChatEvent::Stop(reason) => {
                    info!(reason = %reason, "session: agent stopped");
                    state.end_stream();
                }
                ChatEvent::Warning(message) => {
                    warn!(warning = %message, "session: backend warning");
                }
                ChatEvent::ServerError(message) | ChatEvent::Failed(message) => {
                    warn!(error = %message, "session: exchange error");
                    if !is_quiet_error(&message) {
                        state
                            .messages
                            .push(Message::system(format!("Error: {message}")));
                    }
                    state.end_stream();
                }
                ChatEvent::Complete => state.end_stream(),
            }
        }

        if let Some(application_id) = subscribe_to {
            let mut slot = self.subscription.lock().await;
            if slot.is_none() {
                self.replace_subscription(&mut slot, application_id).await;
            }
        }
    }

    async fn exchange(
        &self,
        shown: &str,
        message: String,
        files: Vec<PendingFile>,
        document_types: Vec<String>,
    ) -> Result<(), SessionError> {
        let request = {
            let mut state = self.state.lock().await;
            let session_id = state
                .session_id
                .clone()
                .ok_or(SessionError::NotInitialized)?;
            state.is_streaming = true;
            state.streaming_text.clear();
            if !shown.is_empty() {
                state.messages.push(Message::user(shown));
            }
            ChatRequest {
                message,
                session_id,
                user_id: state.user_id.clone(),
                documents: files.into_iter().map(PendingFile::into_upload).collect(),
                document_types,
            }
        };

        let events = self.chat.send(request);
        self.drive(events).await;
        Ok(())
    }

    async fn replace_subscription(
        &self,
        slot: &mut Option<Subscription>,
        application_id: ApplicationId,
    ) {
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        let issued = {
            let mut state = self.state.lock().await;
            state.application_id = Some(application_id.clone());
            self.status_generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        let listener = Arc::new(SessionStatusListener {
            state: Arc::clone(&self.state),
            generation: Arc::clone(&self.status_generation),
            issued,
        });
        *slot = Some(self.subscriber.subscribe(application_id, listener));
    }
}

impl Drop for KycSession {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.get_mut().take() {
            subscription.cancel();
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
