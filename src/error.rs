use thiserror::Error;

use crate::client::{ClientError, MessageId};

#[derive(Error, Debug)]
pub enum KomaruError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Message has no inline buttons")]
    NoButtonsAvailable,

    #[error("Button '{0}' not found")]
    ButtonNotFound(String),

    #[error("Timed out waiting for a reply")]
    ResponseTimeout,

    #[error("Action failed: {0}")]
    ActionFailed(#[source] ClientError),

    #[error("An edit waiter is already registered for message {0}")]
    WaiterConflict(MessageId),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, KomaruError>;
