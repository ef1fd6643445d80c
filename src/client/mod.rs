pub mod bridge;
#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message identity. Unique within one chat only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message observed in the game chat, either freshly posted or edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    pub chat: ChatId,
    #[serde(default)]
    pub text: String,
    /// Inline keyboard as rows of button labels.
    #[serde(default)]
    pub buttons: Vec<Vec<String>>,
    /// Sent by our own account.
    #[serde(default)]
    pub outgoing: bool,
    /// An edit of the earlier message with the same id.
    #[serde(default)]
    pub edited: bool,
}

impl InboundMessage {
    pub fn has_buttons(&self) -> bool {
        self.buttons.iter().any(|row| !row.is_empty())
    }

    /// Label of the first button starting with `prefix`, scanning rows top to bottom.
    pub fn find_button(&self, prefix: &str) -> Option<&str> {
        self.buttons
            .iter()
            .flatten()
            .find(|label| label.starts_with(prefix))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
    NewMessage(InboundMessage),
    MessageEdited(InboundMessage),
}

impl ChatEvent {
    pub fn message(&self) -> &InboundMessage {
        match self {
            ChatEvent::NewMessage(m) | ChatEvent::MessageEdited(m) => m,
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("no button matching '{0}'")]
    ButtonNotFound(String),

    #[error("{0}")]
    Remote(String),

    #[error("request timed out")]
    Timeout,

    #[error("client connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// The user-account chat client the player drives.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Resolve a username or numeric id to a chat.
    async fn resolve_chat(&self, target: &str) -> ClientResult<ChatId>;

    /// Post `text` and return the message as sent.
    async fn send_message(&self, chat: ChatId, text: &str) -> ClientResult<InboundMessage>;

    /// Press the inline button labelled `label` on `message`.
    async fn click(&self, message: &InboundMessage, label: &str) -> ClientResult<()>;

    async fn last_message(&self, chat: ChatId) -> ClientResult<Option<InboundMessage>>;

    /// Start receiving new and edited messages of `chat`. Dropping the
    /// subscription unsubscribes.
    fn subscribe(&self, chat: ChatId) -> Subscription;
}

pub struct Subscription {
    chat: ChatId,
    rx: mpsc::UnboundedReceiver<ChatEvent>,
}

impl Subscription {
    pub fn chat(&self) -> ChatId {
        self.chat
    }

    /// Next event, or `None` once the client has shut down.
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already waiting.
    pub fn try_recv(&mut self) -> Option<ChatEvent> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out of chat events to live subscriptions. Subscriptions that were
/// dropped are pruned on the next publish.
#[derive(Default)]
pub struct Subscribers {
    inner: Mutex<Vec<(ChatId, mpsc::UnboundedSender<ChatEvent>)>>,
    closed: AtomicBool,
}

impl Subscribers {
    /// After `close`, the returned subscription is already ended.
    pub fn subscribe(&self, chat: ChatId) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        if !self.closed.load(Ordering::SeqCst) {
            inner.push((chat, tx));
        }
        Subscription { chat, rx }
    }

    pub fn publish(&self, event: ChatEvent) {
        let chat = event.message().chat;
        self.inner.lock().unwrap().retain(|(subscribed, tx)| {
            if *subscribed == chat {
                tx.send(event.clone()).is_ok()
            } else {
                !tx.is_closed()
            }
        });
    }

    /// Drop every sender so that pending `recv` calls return `None`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.closed.store(true, Ordering::SeqCst);
        inner.clear();
    }

    pub fn len(&self) -> usize {
        let mut subs = self.inner.lock().unwrap();
        subs.retain(|(_, tx)| !tx.is_closed());
        subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
