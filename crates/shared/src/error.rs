use thiserror::Error;

/// Failure to interpret a decoded frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown frame `{0}`")]
    UnknownFrame(String),
    #[error("frame `{event}` carried an unexpected payload: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    pub fn is_unknown_frame(&self) -> bool {
        matches!(self, ProtocolError::UnknownFrame(_))
    }
}
