use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{ChatClient, ChatEvent, ChatId, ClientError, InboundMessage, MessageId, Subscription};
use crate::config::InteractorConfig;
use crate::error::{KomaruError, Result};
use crate::pacing::Pacing;

/// An outbound action whose reply should be awaited.
#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    Send(&'a str),
    Click {
        message: &'a InboundMessage,
        label: &'a str,
    },
}

/// Correlates one outbound action with the one inbound message that answers it.
///
/// A reply to a command arrives as a new message. A reply to a button click
/// arrives either as a new message or as an in-place edit of the clicked
/// message, and the click request itself completes asynchronously and may fail.
/// [`Interactor::execute`] hides both behind a single call.
pub struct Interactor {
    client: Arc<dyn ChatClient>,
    chat: ChatId,
    inbox: Arc<Inbox>,
    pacing: Pacing,
    response_timeout: Duration,
    click_grace: Duration,
}

impl Interactor {
    /// Subscribe to `chat`. The subscription lives as long as the interactor.
    pub fn new(client: Arc<dyn ChatClient>, chat: ChatId, config: &InteractorConfig) -> Self {
        let inbox = Arc::new(Inbox::new(client.subscribe(chat)));

        Self {
            client,
            chat,
            inbox,
            pacing: config.pacing(),
            response_timeout: config.response_timeout(),
            click_grace: config.click_grace(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn chat(&self) -> ChatId {
        self.chat
    }

    /// Messages received but not yet claimed by any action.
    pub fn queued_messages(&self) -> usize {
        self.inbox.pump();
        self.inbox.queue.lock().unwrap().len()
    }

    /// Edit waiters currently registered.
    pub fn edit_waiters(&self) -> usize {
        self.inbox.waiters.lock().unwrap().len()
    }

    pub async fn send(&self, text: &str) -> Result<InboundMessage> {
        self.execute(Action::Send(text)).await
    }

    pub async fn click(&self, message: &InboundMessage, label: &str) -> Result<InboundMessage> {
        self.execute(Action::Click { message, label }).await
    }

    /// Perform `action` and return the single message that answers it.
    ///
    /// Anything that arrived before the action was issued is discarded first,
    /// so a late reply to an earlier action is never mistaken for this one.
    pub async fn execute(&self, action: Action<'_>) -> Result<InboundMessage> {
        self.pacing.pause().await;

        let dropped = self.inbox.drain().await;
        if dropped > 0 {
            debug!("Discarded {dropped} stale message(s) before {}", action.kind());
        }

        match action {
            Action::Send(text) => self.send_and_wait(text).await,
            Action::Click { message, label } => self.click_and_wait(message, label).await,
        }
    }

    async fn send_and_wait(&self, text: &str) -> Result<InboundMessage> {
        debug!("Sending to chat {}: '{text}'", self.chat);
        self.client
            .send_message(self.chat, text)
            .await
            .map_err(KomaruError::ActionFailed)?;

        match tokio::time::timeout(self.response_timeout, self.inbox.next_message()).await {
            Ok(msg) => {
                debug!("Got new message {}", msg.id);
                Ok(msg)
            }
            Err(_) => {
                warn!("Timeout waiting for a reply to '{text}'");
                Err(KomaruError::ResponseTimeout)
            }
        }
    }

    async fn click_and_wait(&self, message: &InboundMessage, label: &str) -> Result<InboundMessage> {
        if !message.has_buttons() {
            return Err(KomaruError::NoButtonsAvailable);
        }

        let mut edit = self.inbox.watch_edit(message.id)?;
        debug!("Clicking '{label}' on message {}", message.id);

        let click = self.client.click(message, label);
        tokio::pin!(click);
        let mut click_acked = false;
        let mut edit_open = true;
        let mut deadline = Instant::now() + self.response_timeout;

        // Polled in declaration order, so a failed click is seen before any
        // message that became ready at the same time.
        let outcome = loop {
            tokio::select! {
                biased;

                res = &mut click, if !click_acked => match res {
                    Ok(()) => {
                        debug!("Click on '{label}' acknowledged");
                        click_acked = true;
                        deadline = Instant::now() + self.response_timeout;
                    }
                    Err(ClientError::ButtonNotFound(_)) => {
                        break Err(KomaruError::ButtonNotFound(label.to_string()));
                    }
                    Err(e) => {
                        warn!("Click on '{label}' failed: {e}");
                        break Err(KomaruError::ActionFailed(e));
                    }
                },
                res = &mut edit.rx, if edit_open => match res {
                    Ok(msg) => {
                        debug!("Got edit of message {}", msg.id);
                        break Ok(msg);
                    }
                    Err(_) => edit_open = false,
                },
                msg = self.inbox.next_message() => {
                    debug!("Got new message {}", msg.id);
                    break Ok(msg);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if click_acked {
                        debug!("No visible reaction to '{label}', keeping message {}", message.id);
                        break Ok(message.clone());
                    }
                    warn!("Timeout waiting for a reply after clicking '{label}'");
                    break Err(KomaruError::ResponseTimeout);
                }
            }
        };

        drop(edit);

        if outcome.is_ok() && !click_acked {
            // The reply beat the click acknowledgement. Give the request a
            // moment to settle, then cancel it; its result is only logged.
            match tokio::time::timeout(self.click_grace, &mut click).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Click on '{label}' reported an error after its reply: {e}"),
                Err(_) => debug!("Abandoning unacknowledged click on '{label}'"),
            }
        }

        if let Ok(msg) = &outcome {
            info!("Click on '{label}' answered by message {}", msg.id);
        }
        outcome
    }
}

impl Action<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Action::Send(_) => "send",
            Action::Click { .. } => "click",
        }
    }
}

/// The chat subscription plus what has been read from it but not yet claimed.
///
/// Events stay in the subscription until an action asks for them, so a drain
/// before an action sees everything published up to that point.
struct Inbox {
    events: AsyncMutex<Subscription>,
    queue: Mutex<VecDeque<InboundMessage>>,
    waiters: Mutex<HashMap<MessageId, (u64, oneshot::Sender<InboundMessage>)>>,
    next_token: AtomicU64,
}

impl Inbox {
    fn new(subscription: Subscription) -> Self {
        Self {
            events: AsyncMutex::new(subscription),
            queue: Mutex::new(VecDeque::new()),
            waiters: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    /// Route whatever the subscription already holds, without waiting.
    fn pump(&self) {
        let Ok(mut events) = self.events.try_lock() else {
            return;
        };
        while let Some(event) = events.try_recv() {
            self.route(event);
        }
    }

    /// Discard every pending event and queued message, including edits
    /// nobody has claimed yet. Returns the number of new messages dropped.
    async fn drain(&self) -> usize {
        let mut dropped = 0;
        {
            let mut events = self.events.lock().await;
            while let Some(event) = events.try_recv() {
                if let ChatEvent::NewMessage(msg) = event {
                    if !msg.outgoing {
                        dropped += 1;
                    }
                }
            }
        }
        let mut queue = self.queue.lock().unwrap();
        dropped += queue.len();
        queue.clear();
        dropped
    }

    /// Queue a new message or hand an edit to its waiter. Returns true when
    /// an edit was delivered.
    fn route(&self, event: ChatEvent) -> bool {
        match event {
            ChatEvent::NewMessage(msg) => {
                if !msg.outgoing {
                    debug!("New message {} in chat {}", msg.id, msg.chat);
                    self.queue.lock().unwrap().push_back(msg);
                }
                false
            }
            ChatEvent::MessageEdited(msg) => {
                let id = msg.id;
                let delivered = self.deliver_edit(msg);
                if delivered {
                    debug!("Delivered edit of message {id} to its waiter");
                }
                delivered
            }
        }
    }

    /// Next new message. Cancel-safe: nothing is removed unless returned.
    async fn next_message(&self) -> InboundMessage {
        loop {
            if let Some(msg) = self.queue.lock().unwrap().pop_front() {
                return msg;
            }
            let event = self.events.lock().await.recv().await;
            match event {
                Some(event) => {
                    if self.route(event) {
                        // Let the edit waiter be observed before anything that follows it.
                        tokio::task::yield_now().await;
                    }
                }
                None => {
                    debug!("Event subscription closed");
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    fn watch_edit(self: &Arc<Self>, id: MessageId) -> Result<EditWatch> {
        let mut waiters = self.waiters.lock().unwrap();
        if waiters.contains_key(&id) {
            return Err(KomaruError::WaiterConflict(id));
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        waiters.insert(id, (token, tx));
        Ok(EditWatch {
            inbox: self.clone(),
            id,
            token,
            rx,
        })
    }

    /// Hand an edit to its waiter. Returns false when nobody watches `msg.id`.
    fn deliver_edit(&self, msg: InboundMessage) -> bool {
        let waiter = self.waiters.lock().unwrap().remove(&msg.id);
        match waiter {
            Some((_, tx)) => tx.send(msg).is_ok(),
            None => false,
        }
    }
}

/// Registration of an edit waiter; unregisters on drop.
struct EditWatch {
    inbox: Arc<Inbox>,
    id: MessageId,
    token: u64,
    rx: oneshot::Receiver<InboundMessage>,
}

impl Drop for EditWatch {
    fn drop(&mut self) {
        let mut waiters = self.inbox.waiters.lock().unwrap();
        if matches!(waiters.get(&self.id), Some((token, _)) if *token == self.token) {
            waiters.remove(&self.id);
        }
    }
}
