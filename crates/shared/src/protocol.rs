use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::{ApplicationId, StageStatus},
    error::ProtocolError,
};

/// Frame names used by the chat and status streams.
pub mod frame {
    pub const SESSION: &str = "session";
    pub const TEXT: &str = "text";
    pub const TOOL_CALL: &str = "tool_call";
    pub const TOOL_RESULT: &str = "tool_result";
    pub const DOCUMENT_UPLOADED: &str = "document_uploaded";
    pub const KYC_PROGRESS: &str = "kyc_progress";
    pub const STOP: &str = "stop";
    pub const WARNING: &str = "warning";
    pub const ERROR: &str = "error";
    pub const INIT: &str = "init";
    pub const STAGE_UPDATE: &str = "stage_update";
    pub const COMPLETE: &str = "complete";
}

/// Data carried by a frame: structured when it parsed as JSON, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Json(Value),
    Text(String),
}

impl FramePayload {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => FramePayload::Json(value),
            Err(_) => FramePayload::Text(raw.to_string()),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            FramePayload::Json(value) => T::deserialize(value),
            FramePayload::Text(text) => serde_json::from_str(text),
        }
    }

    /// Human-readable rendering, used for `error` frames which may be plain text.
    pub fn to_text(&self) -> String {
        match self {
            FramePayload::Text(text) => text.clone(),
            FramePayload::Json(Value::String(text)) => text.clone(),
            FramePayload::Json(Value::Object(map)) => ["message", "error", "detail"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
            FramePayload::Json(other) => other.to_string(),
        }
    }
}

/// One complete event-plus-payload block of the line-framed stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: String,
    pub payload: FramePayload,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, payload: FramePayload) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        self.payload
            .decode()
            .map_err(|source| ProtocolError::Payload {
                event: self.event.clone(),
                source,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFrame {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextFrame {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFrame {
    pub tool_name: String,
    pub tool_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultFrame {
    pub tool_id: String,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentUploadedFrame {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopFrame {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningFrame {
    pub message: String,
}

/// Raw per-stage report exactly as the backend sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage_name: String,
    #[serde(default)]
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub application_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub current_stage: Option<String>,
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents_uploaded: Option<u32>,
}

impl ProgressSnapshot {
    pub fn application_id(&self) -> Option<ApplicationId> {
        if self.application_id.is_empty() {
            None
        } else {
            Some(ApplicationId(self.application_id.clone()))
        }
    }

    /// Snapshot synthesized from a lone `stage_update`: only the current stage is known.
    pub fn is_partial(&self) -> bool {
        self.application_id.is_empty() && self.status.is_empty() && self.stages.is_empty()
    }

    pub fn partial(current_stage: impl Into<String>) -> Self {
        Self {
            current_stage: Some(current_stage.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageUpdate {
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub current_stage: Option<String>,
}

/// Typed view of a frame received on the chat stream.
#[derive(Debug, Clone)]
pub enum ChatFrame {
    Session(SessionFrame),
    Text(TextFrame),
    ToolCall(ToolCallFrame),
    ToolResult(ToolResultFrame),
    DocumentUploaded(DocumentUploadedFrame),
    Progress(ProgressSnapshot),
    Stop(StopFrame),
    Warning(WarningFrame),
    Error(String),
}

impl ChatFrame {
    pub fn decode(frame: &SseFrame) -> Result<Self, ProtocolError> {
        Ok(match frame.event.as_str() {
            frame::SESSION => ChatFrame::Session(frame.decode()?),
            frame::TEXT => ChatFrame::Text(frame.decode()?),
            frame::TOOL_CALL => ChatFrame::ToolCall(frame.decode()?),
            frame::TOOL_RESULT => ChatFrame::ToolResult(frame.decode()?),
            frame::DOCUMENT_UPLOADED => ChatFrame::DocumentUploaded(frame.decode()?),
            frame::KYC_PROGRESS => ChatFrame::Progress(frame.decode()?),
            frame::STOP => ChatFrame::Stop(frame.decode()?),
            frame::WARNING => ChatFrame::Warning(frame.decode()?),
            frame::ERROR => ChatFrame::Error(frame.payload.to_text()),
            other => return Err(ProtocolError::UnknownFrame(other.to_string())),
        })
    }
}

/// Typed view of a frame received on the status stream.
#[derive(Debug, Clone)]
pub enum StatusFrame {
    Init(ProgressSnapshot),
    Progress(ProgressSnapshot),
    StageUpdate(StageUpdate),
    Complete,
}

impl StatusFrame {
    pub fn decode(frame: &SseFrame) -> Result<Self, ProtocolError> {
        Ok(match frame.event.as_str() {
            frame::INIT => StatusFrame::Init(frame.decode()?),
            frame::KYC_PROGRESS => StatusFrame::Progress(frame.decode()?),
            frame::STAGE_UPDATE => StatusFrame::StageUpdate(frame.decode()?),
            frame::COMPLETE => StatusFrame::Complete,
            other => return Err(ProtocolError::UnknownFrame(other.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_falls_back_to_text() {
        assert_eq!(
            FramePayload::parse("upstream exploded"),
            FramePayload::Text("upstream exploded".into())
        );
        assert!(matches!(
            FramePayload::parse("{\"text\":\"hi\"}"),
            FramePayload::Json(_)
        ));
    }

    #[test]
    fn error_frame_text_prefers_message_fields() {
        let payload = FramePayload::parse("{\"message\":\"agent unavailable\"}");
        assert_eq!(payload.to_text(), "agent unavailable");
        assert_eq!(FramePayload::parse("\"quoted\"").to_text(), "quoted");
    }

    #[test]
    fn decodes_progress_frame_with_sparse_fields() {
        let frame = SseFrame::new(
            frame::KYC_PROGRESS,
            FramePayload::parse(
                r#"{"application_id":"app-1","status":"in_progress","current_stage":"ocr_processing","stages":[{"stage_name":"initiated","status":"completed"}]}"#,
            ),
        );
        let ChatFrame::Progress(snapshot) = ChatFrame::decode(&frame).expect("decode") else {
            panic!("expected progress frame");
        };
        assert_eq!(snapshot.application_id(), Some(ApplicationId::from("app-1")));
        assert_eq!(snapshot.stages[0].status, StageStatus::Completed);
        assert!(!snapshot.is_partial());
    }

    #[test]
    fn unknown_frames_are_reported() {
        let frame = SseFrame::new("heartbeat", FramePayload::Text("ping".into()));
        assert!(matches!(
            ChatFrame::decode(&frame),
            Err(ProtocolError::UnknownFrame(name)) if name == "heartbeat"
        ));
    }

    #[test]
    fn status_complete_ignores_payload() {
        let frame = SseFrame::new(frame::COMPLETE, FramePayload::Text("done".into()));
        assert!(matches!(
            StatusFrame::decode(&frame).expect("decode"),
            StatusFrame::Complete
        ));
    }
}
