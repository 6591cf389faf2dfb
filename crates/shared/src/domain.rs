use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(SessionId);
id_newtype!(ApplicationId);
id_newtype!(UserId);
id_newtype!(MessageId);

/// Short random suffix used by generated ids.
pub fn random_suffix(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_string()
}

impl MessageId {
    pub fn generate() -> Self {
        Self(format!(
            "msg-{}-{}",
            Utc::now().timestamp_millis(),
            random_suffix(9)
        ))
    }
}

impl SessionId {
    /// Fresh id in the `kyc-session-<millis>-<suffix>` form the backend keys sessions by.
    pub fn generate() -> Self {
        Self(format!(
            "kyc-session-{}-{}",
            Utc::now().timestamp_millis(),
            random_suffix(7)
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of the chat history. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, action: Option<Action>) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            action,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, None)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, None)
    }
}

/// Directive embedded in assistant text telling the client which interactive
/// component to present next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    pub fn action_type(&self) -> ActionType {
        self.kind.action_type()
    }

    /// Description shown to the user, falling back to a per-type default.
    pub fn display_description(&self) -> String {
        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            return description.to_string();
        }
        match self.kind {
            ActionKind::FileUpload { .. } => "Please upload your document".to_string(),
            ActionKind::ConfirmData { .. } => "Please confirm the extracted data".to_string(),
            _ => String::new(),
        }
    }

    /// Extracted data carried by a `confirm_data` action.
    pub fn extracted_data(&self) -> Option<&Map<String, Value>> {
        match &self.kind {
            ActionKind::ConfirmData { data, .. } => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    FileUpload,
    ConfirmData,
    AdditionalDocsRequest,
    LivePhoto,
    VerificationProgress,
    Info,
}

/// Reads an explicit `null` the same as an absent key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    FileUpload {
        #[serde(
            default,
            deserialize_with = "null_as_default",
            skip_serializing_if = "Vec::is_empty"
        )]
        accept: Vec<String>,
        #[serde(
            default,
            rename = "maxFiles",
            skip_serializing_if = "Option::is_none"
        )]
        max_files: Option<u32>,
    },
    ConfirmData {
        #[serde(default, deserialize_with = "null_as_default")]
        data: Map<String, Value>,
        #[serde(
            default,
            deserialize_with = "null_as_default",
            skip_serializing_if = "Vec::is_empty"
        )]
        documents: Vec<DocumentExtractedData>,
    },
    AdditionalDocsRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nationality: Option<String>,
        #[serde(
            default,
            deserialize_with = "null_as_default",
            skip_serializing_if = "Vec::is_empty"
        )]
        required_docs: Vec<AdditionalDocType>,
    },
    LivePhoto,
    VerificationProgress {
        #[serde(default, deserialize_with = "null_as_default")]
        data: VerificationProgressData,
    },
    Info {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant: Option<InfoVariant>,
    },
}

impl ActionKind {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionKind::FileUpload { .. } => ActionType::FileUpload,
            ActionKind::ConfirmData { .. } => ActionType::ConfirmData,
            ActionKind::AdditionalDocsRequest { .. } => ActionType::AdditionalDocsRequest,
            ActionKind::LivePhoto => ActionType::LivePhoto,
            ActionKind::VerificationProgress { .. } => ActionType::VerificationProgress,
            ActionKind::Info { .. } => ActionType::Info,
        }
    }
}

/// Per-document extraction result; the field set depends on the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentExtractedData {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdditionalDocType {
    Passport,
    Visa,
    LivePhoto,
    WorkPermit,
    ProofOfAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoVariant {
    Info,
    Warning,
    Success,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationProgressData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Approved,
    Rejected,
    ManualReview,
    InProgress,
}

impl VerificationProgressData {
    pub fn outcome(&self) -> VerificationOutcome {
        let Some(raw) = self.outcome.as_deref() else {
            return VerificationOutcome::InProgress;
        };
        match raw.to_ascii_lowercase().as_str() {
            "approved" | "verified" | "completed" => VerificationOutcome::Approved,
            "rejected" | "failed" | "declined" => VerificationOutcome::Rejected,
            "manual_review" | "review" | "hold" => VerificationOutcome::ManualReview,
            _ => VerificationOutcome::InProgress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    InProgress,
    Completed,
    Failed,
    #[default]
    #[serde(other)]
    Pending,
}

/// Display-level phase of the verification journey, in journey order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStage {
    JourneyInitiation,
    ConsentAuthorization,
    DocumentCapture,
    PresenceConfirmation,
    LivenessInteraction,
    OutcomeNotification,
    CompletionConfirmation,
}

impl CanonicalStage {
    pub const ALL: [CanonicalStage; 7] = [
        CanonicalStage::JourneyInitiation,
        CanonicalStage::ConsentAuthorization,
        CanonicalStage::DocumentCapture,
        CanonicalStage::PresenceConfirmation,
        CanonicalStage::LivenessInteraction,
        CanonicalStage::OutcomeNotification,
        CanonicalStage::CompletionConfirmation,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn is_final(self) -> bool {
        self == CanonicalStage::CompletionConfirmation
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalStage::JourneyInitiation => "journey_initiation",
            CanonicalStage::ConsentAuthorization => "consent_authorization",
            CanonicalStage::DocumentCapture => "document_capture",
            CanonicalStage::PresenceConfirmation => "presence_confirmation",
            CanonicalStage::LivenessInteraction => "liveness_interaction",
            CanonicalStage::OutcomeNotification => "outcome_notification",
            CanonicalStage::CompletionConfirmation => "completion_confirmation",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CanonicalStage::JourneyInitiation => "Identity Journey Initiation",
            CanonicalStage::ConsentAuthorization => "Consent & Privacy Authorization",
            CanonicalStage::DocumentCapture => "Smart Document Capture",
            CanonicalStage::PresenceConfirmation => "Live Presence Confirmation",
            CanonicalStage::LivenessInteraction => "AI-Guided Liveness Interaction",
            CanonicalStage::OutcomeNotification => "Verification Outcome Notification",
            CanonicalStage::CompletionConfirmation => "eKYC Completion Confirmation",
        }
    }
}

impl fmt::Display for CanonicalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
