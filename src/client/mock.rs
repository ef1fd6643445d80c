use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    ChatClient, ChatEvent, ChatId, ClientError, ClientResult, InboundMessage, MessageId,
    Subscribers, Subscription,
};

pub const CHAT: ChatId = ChatId(42);

pub fn message(id: i64, text: &str) -> InboundMessage {
    InboundMessage {
        id: MessageId(id),
        chat: CHAT,
        text: text.to_string(),
        buttons: vec![],
        outgoing: false,
        edited: false,
    }
}

pub fn with_buttons(mut msg: InboundMessage, rows: &[&[&str]]) -> InboundMessage {
    msg.buttons = rows
        .iter()
        .map(|row| row.iter().map(|l| l.to_string()).collect())
        .collect();
    msg
}

pub fn edit_of(original: &InboundMessage, text: &str, rows: &[&[&str]]) -> InboundMessage {
    let mut msg = with_buttons(message(original.id.0, text), rows);
    msg.edited = true;
    msg
}

#[derive(Debug, Clone)]
pub enum ClickResult {
    Ok,
    NotFound,
    Fail(String),
    Hang,
}

/// Reaction of the fake game to one click.
pub struct ClickScript {
    pub result: ClickResult,
    pub latency: Duration,
    pub events: Vec<(Duration, ChatEvent)>,
}

impl ClickScript {
    pub fn ok() -> Self {
        Self {
            result: ClickResult::Ok,
            latency: Duration::ZERO,
            events: vec![],
        }
    }

    pub fn replies(events: Vec<ChatEvent>) -> Self {
        Self {
            events: events.into_iter().map(|e| (Duration::ZERO, e)).collect(),
            ..Self::ok()
        }
    }

    pub fn failing(result: ClickResult) -> Self {
        Self {
            result,
            ..Self::ok()
        }
    }
}

type Probe = Arc<dyn Fn() + Send + Sync>;

/// Scripted in-memory chat client.
#[derive(Default)]
pub struct MockClient {
    subscribers: Arc<Subscribers>,
    next_id: AtomicI64,
    on_send: Mutex<VecDeque<Vec<(Duration, ChatEvent)>>>,
    on_click: Mutex<VecDeque<ClickScript>>,
    last: Mutex<Option<InboundMessage>>,
    click_probe: Mutex<Option<Probe>>,
    echo_outgoing: AtomicBool,
    pub sent: Mutex<Vec<String>>,
    pub clicks: Mutex<Vec<(MessageId, String)>>,
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(1000),
            ..Self::default()
        })
    }

    /// Queue the events the game emits in reply to the next `send_message`.
    pub fn reply_to_send(&self, events: Vec<ChatEvent>) {
        self.reply_to_send_after(events.into_iter().map(|e| (Duration::ZERO, e)).collect());
    }

    pub fn reply_to_send_after(&self, events: Vec<(Duration, ChatEvent)>) {
        self.on_send.lock().unwrap().push_back(events);
    }

    pub fn script_click(&self, script: ClickScript) {
        self.on_click.lock().unwrap().push_back(script);
    }

    pub fn set_last_message(&self, msg: Option<InboundMessage>) {
        *self.last.lock().unwrap() = msg;
    }

    /// Run `probe` at the start of every click.
    pub fn on_click_start(&self, probe: impl Fn() + Send + Sync + 'static) {
        *self.click_probe.lock().unwrap() = Some(Arc::new(probe));
    }

    pub fn echo_outgoing(&self, on: bool) {
        self.echo_outgoing.store(on, Ordering::SeqCst);
    }

    pub fn emit(&self, event: ChatEvent) {
        self.subscribers.publish(event);
    }

    /// End every subscription, as a dropped session would.
    pub fn disconnect(&self) {
        self.subscribers.close();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clicked_labels(&self) -> Vec<String> {
        self.clicks.lock().unwrap().iter().map(|(_, l)| l.clone()).collect()
    }

    fn schedule(&self, events: Vec<(Duration, ChatEvent)>) {
        for (delay, event) in events {
            if delay.is_zero() {
                self.subscribers.publish(event);
            } else {
                let subscribers = self.subscribers.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    subscribers.publish(event);
                });
            }
        }
    }
}

#[async_trait]
impl ChatClient for MockClient {
    async fn resolve_chat(&self, _target: &str) -> ClientResult<ChatId> {
        Ok(CHAT)
    }

    async fn send_message(&self, chat: ChatId, text: &str) -> ClientResult<InboundMessage> {
        self.sent.lock().unwrap().push(text.to_string());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut own = message(id, text);
        own.chat = chat;
        own.outgoing = true;
        if self.echo_outgoing.load(Ordering::SeqCst) {
            self.subscribers.publish(ChatEvent::NewMessage(own.clone()));
        }

        let replies = self.on_send.lock().unwrap().pop_front().unwrap_or_default();
        self.schedule(replies);
        Ok(own)
    }

    async fn click(&self, message: &InboundMessage, label: &str) -> ClientResult<()> {
        let probe = self.click_probe.lock().unwrap().clone();
        if let Some(probe) = probe {
            probe();
        }
        self.clicks
            .lock()
            .unwrap()
            .push((message.id, label.to_string()));

        let script = self
            .on_click
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ClickScript::ok);

        if !script.latency.is_zero() {
            tokio::time::sleep(script.latency).await;
        }
        match script.result {
            ClickResult::Ok => {
                self.schedule(script.events);
                Ok(())
            }
            ClickResult::NotFound => Err(ClientError::ButtonNotFound(label.to_string())),
            ClickResult::Fail(reason) => Err(ClientError::Remote(reason)),
            ClickResult::Hang => {
                self.schedule(script.events);
                std::future::pending().await
            }
        }
    }

    async fn last_message(&self, _chat: ChatId) -> ClientResult<Option<InboundMessage>> {
        Ok(self.last.lock().unwrap().clone())
    }

    fn subscribe(&self, chat: ChatId) -> Subscription {
        self.subscribers.subscribe(chat)
    }
}
