use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("stream read failed: {0}")]
    Read(String),
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

impl TransportError {
    /// Text surfaced to the user when the backend refused the request.
    pub fn user_message(&self) -> String {
        match self {
            TransportError::Status { status, body } if body.trim().is_empty() => {
                format!("HTTP {status}")
            }
            TransportError::Status { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid action json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("action is missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not initialized")]
    NotInitialized,
    #[error("no application id known for this session")]
    NoApplication,
    #[error("no files pending for upload")]
    NoPendingFiles,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid api base url `{url}`: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("api base url `{0}` must use http or https")]
    UnsupportedScheme(String),
}
