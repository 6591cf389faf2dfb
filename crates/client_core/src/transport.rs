use std::time::Duration;

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use reqwest::{multipart, Client, Response};
use serde_json::Value;
use shared::{
    domain::{ApplicationId, SessionId, UserId},
    protocol::ProgressSnapshot,
};
use tracing::{debug, info};
use url::Url;

use crate::{config::ClientSettings, error::TransportError};

/// Raw body of a streaming response, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDocument {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// One outbound chat turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
    pub documents: Vec<UploadDocument>,
    /// Document type labels, in the same order as `documents`.
    pub document_types: Vec<String>,
}

impl ChatRequest {
    pub fn text(message: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            message: message.into(),
            session_id,
            user_id: None,
            documents: Vec::new(),
            document_types: Vec::new(),
        }
    }
}

#[async_trait]
pub trait KycTransport: Send + Sync {
    async fn open_chat_stream(&self, request: ChatRequest) -> Result<ByteStream, TransportError>;
    async fn open_status_stream(
        &self,
        application_id: &ApplicationId,
    ) -> Result<ByteStream, TransportError>;
    /// Last known snapshot; any failure reads as `None`.
    async fn fetch_status(&self, application_id: &ApplicationId) -> Option<ProgressSnapshot>;
}

pub struct HttpTransport {
    http: Client,
    base_url: Url,
    snapshot_timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Self::with_client(Client::new(), base_url, Duration::from_secs(30))
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(settings.request_timeout_secs);
        // Streams stay open for the whole exchange, so only connecting is bounded.
        let http = Client::builder().connect_timeout(timeout).build()?;
        Self::with_client(http, &settings.api_base_url, timeout)
    }

    pub fn with_client(
        http: Client,
        base_url: &str,
        snapshot_timeout: Duration,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            snapshot_timeout,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    async fn try_fetch_status(
        &self,
        application_id: &ApplicationId,
    ) -> Result<ProgressSnapshot, TransportError> {
        let response = self
            .http
            .get(self.endpoint(&format!("/kyc/applications/{application_id}/status")))
            .timeout(self.snapshot_timeout)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl KycTransport for HttpTransport {
    async fn open_chat_stream(&self, request: ChatRequest) -> Result<ByteStream, TransportError> {
        let ChatRequest {
            message,
            session_id,
            user_id,
            documents,
            document_types,
        } = request;

        let mut form = multipart::Form::new()
            .text("message", message)
            .text("session_id", session_id.0.clone());
        if let Some(user_id) = user_id {
            form = form.text("user_id", user_id.0);
        }

        let document_count = documents.len();
        for document in documents {
            let mut part = multipart::Part::bytes(document.bytes).file_name(document.filename);
            if let Some(mime_type) = document.mime_type.as_deref() {
                part = part.mime_str(mime_type)?;
            }
            form = form.part("documents", part);
        }
        if document_count > 0 && !document_types.is_empty() {
            form = form.text("document_types", Value::from(document_types).to_string());
        }

        info!(
            session_id = %session_id,
            documents = document_count,
            "transport: opening chat stream"
        );
        let response = self
            .http
            .post(self.endpoint("/kyc/chat/stream/upload"))
            .multipart(form)
            .send()
            .await?;
        into_byte_stream(response).await
    }

    async fn open_status_stream(
        &self,
        application_id: &ApplicationId,
    ) -> Result<ByteStream, TransportError> {
        info!(application_id = %application_id, "transport: opening status stream");
        let response = self
            .http
            .get(self.endpoint(&format!("/kyc/status/{application_id}")))
            .send()
            .await?;
        into_byte_stream(response).await
    }

    async fn fetch_status(&self, application_id: &ApplicationId) -> Option<ProgressSnapshot> {
        match self.try_fetch_status(application_id).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                debug!(application_id = %application_id, error = %err, "transport: no status snapshot");
                None
            }
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn into_byte_stream(response: Response) -> Result<ByteStream, TransportError> {
    let response = ensure_success(response).await?;
    Ok(response
        .bytes_stream()
        .map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|err| TransportError::Read(err.to_string()))
        })
        .boxed())
}
