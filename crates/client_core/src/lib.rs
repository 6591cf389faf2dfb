//! Client core for the identity-verification chat: stream decoding, action
//! extraction, stage mapping and the session store that ties them together.

pub mod action;
pub mod chat_stream;
pub mod config;
pub mod error;
pub mod progress;
pub mod session;
pub mod sse;
pub mod subscription;
pub mod transport;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

pub use action::{has_ui_action, parse_ui_action, strip_ui_action, ParsedMessage};
pub use chat_stream::{ChatEvent, ChatEventStream, ChatExchange, ChatStreamClient};
pub use config::{load_settings, ClientSettings};
pub use error::{ConfigError, SessionError, TransportError};
pub use progress::{merge, merge_with_floor, StageView, Verdict};
pub use session::{
    KycSession, PendingAction, PendingFile, SessionConfig, SessionIdRegistry, SessionState,
};
pub use sse::SseDecoder;
pub use subscription::{StatusListener, StatusSubscriber, Subscription};
pub use transport::{ByteStream, ChatRequest, HttpTransport, KycTransport, UploadDocument};
