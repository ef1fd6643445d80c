use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    ChatClient, ChatEvent, ChatId, ClientError, ClientResult, InboundMessage, MessageId,
    Subscribers, Subscription,
};
use crate::config::ClientConfig;
use crate::error::{KomaruError, Result};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Resolve {
        target: &'a str,
    },
    Send {
        chat: ChatId,
        text: &'a str,
    },
    Click {
        chat: ChatId,
        message_id: MessageId,
        label: &'a str,
    },
    LastMessage {
        chat: ChatId,
    },
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: Request<'a>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Reply(Reply),
    NewMessage { message: InboundMessage },
    MessageEdited { message: InboundMessage },
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    #[serde(default)]
    chat: Option<ChatId>,
    #[serde(default)]
    message: Option<InboundMessage>,
    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl From<RemoteError> for ClientError {
    fn from(e: RemoteError) -> Self {
        match e.kind.as_str() {
            "button_not_found" => ClientError::ButtonNotFound(e.message),
            _ => ClientError::Remote(e.message),
        }
    }
}

/// [`ChatClient`] backed by a sidecar process that owns the Telegram user
/// session. Requests and events travel as newline-delimited JSON over the
/// sidecar's stdin/stdout; replies are matched to requests by `id`. The
/// contract is described in `README.md`.
pub struct BridgeClient {
    writer: TokioMutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Pending,
    subscribers: Arc<Subscribers>,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: JoinHandle<()>,
    child: Mutex<Option<Child>>,
}

impl BridgeClient {
    /// Spawn the sidecar described by `config` and attach to its stdio.
    pub fn spawn(config: &ClientConfig) -> Result<Self> {
        debug!(
            "Spawning chat bridge: {} {:?}",
            config.command, config.args
        );

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                KomaruError::Config(format!(
                    "Failed to spawn chat bridge '{}': {e}",
                    config.command
                ))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            return Err(KomaruError::Config("Chat bridge stdio unavailable".into()));
        };

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[bridge] {line}");
                }
            });
        }

        let client = Self::from_io(stdout, stdin, config.request_timeout());
        *client.child.lock().unwrap() = Some(child);
        Ok(client)
    }

    /// Attach to an already connected bridge stream.
    pub fn from_io<R, W>(reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let subscribers = Arc::new(Subscribers::default());
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_frames(
            reader,
            pending.clone(),
            subscribers.clone(),
            closed.clone(),
        ));

        Self {
            writer: TokioMutex::new(Box::new(writer)),
            pending,
            subscribers,
            closed,
            next_id: AtomicU64::new(1),
            request_timeout,
            reader,
            child: Mutex::new(None),
        }
    }

    async fn request(&self, request: Request<'_>) -> ClientResult<Reply> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);
        let _slot = PendingSlot {
            id,
            pending: &self.pending,
        };
        // The reader may have failed every pending request just before the insert.
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let mut line = serde_json::to_string(&Envelope { id, request })?;
        line.push('\n');
        {
            let mut writer = self.writer.lock().await;
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }

        let mut reply = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(ClientError::Closed),
            Err(_) => return Err(ClientError::Timeout),
        };
        match reply.error.take() {
            Some(e) => Err(e.into()),
            None => Ok(reply),
        }
    }

    #[cfg(test)]
    fn pending_requests(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(child) = self.child.get_mut().unwrap().as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Removes a request from the pending table when its caller finishes or gives up.
struct PendingSlot<'a> {
    id: u64,
    pending: &'a Pending,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().unwrap().remove(&self.id);
    }
}

#[async_trait]
impl ChatClient for BridgeClient {
    async fn resolve_chat(&self, target: &str) -> ClientResult<ChatId> {
        let reply = self.request(Request::Resolve { target }).await?;
        reply
            .chat
            .ok_or_else(|| ClientError::Remote(format!("no chat resolved for '{target}'")))
    }

    async fn send_message(&self, chat: ChatId, text: &str) -> ClientResult<InboundMessage> {
        let reply = self.request(Request::Send { chat, text }).await?;
        reply
            .message
            .ok_or_else(|| ClientError::Remote("send reply carried no message".into()))
    }

    async fn click(&self, message: &InboundMessage, label: &str) -> ClientResult<()> {
        self.request(Request::Click {
            chat: message.chat,
            message_id: message.id,
            label,
        })
        .await?;
        Ok(())
    }

    async fn last_message(&self, chat: ChatId) -> ClientResult<Option<InboundMessage>> {
        let reply = self.request(Request::LastMessage { chat }).await?;
        Ok(reply.message)
    }

    fn subscribe(&self, chat: ChatId) -> Subscription {
        self.subscribers.subscribe(chat)
    }
}

async fn read_frames<R>(
    reader: R,
    pending: Pending,
    subscribers: Arc<Subscribers>,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Chat bridge read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Frame>(&line) {
            Ok(Frame::Reply(reply)) => {
                let waiter = pending.lock().unwrap().remove(&reply.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => debug!("Dropping reply to unknown request {}", reply.id),
                }
            }
            Ok(Frame::NewMessage { message }) => {
                subscribers.publish(ChatEvent::NewMessage(message));
            }
            Ok(Frame::MessageEdited { mut message }) => {
                message.edited = true;
                subscribers.publish(ChatEvent::MessageEdited(message));
            }
            Err(e) => warn!("Skipping malformed bridge frame: {e}"),
        }
    }

    debug!("Chat bridge stream closed");
    closed.store(true, Ordering::SeqCst);
    pending.lock().unwrap().clear();
    subscribers.close();
}
