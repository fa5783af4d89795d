mod model;
mod namespace;
mod routing;
mod settings;
mod storage;
mod store;

use thiserror::Error;

pub use model::{
    AppConfig, CopilotDetail, DEFAULT_SESSION_MODEL, DEFAULT_SESSION_NAME, Message, MessageRole,
    SESSION_TYPE_CHAT, Session, Settings,
};
pub use namespace::{APP_STORE_PREFIX, HAS_VISITED_KEY};
pub use routing::{
    DEFAULT_PROXY_ENDPOINT, HEADER_PLATFORM, HEADER_TARGET_URI, HEADER_VERSION, Headers,
    PROXY_PATH, ProxyConfig, RoutingDecision, is_correlation_header, is_loopback_host,
    routing_decision,
};
pub use settings::{
    PROVIDER_CHATBOX_AI, PROVIDER_OLLAMA, PROVIDER_OPENAI, SettingsUpdate, modify_settings,
    needs_edit_setting,
};
pub use storage::{DEFAULT_QUOTA_BYTES, MemoryStorage, StoragePort, entry_size};
pub use store::{DefaultReason, KeyValueStore, Outcome, StoreKey};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage quota exceeded: need {needed} bytes, quota is {quota}")]
    QuotaExceeded { needed: usize, quota: usize },
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("stored value for {key} has an unexpected shape: {message}")]
    Decode { key: String, message: String },
}
