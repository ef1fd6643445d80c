use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::client::{ChatClient, ChatEvent, ChatId, InboundMessage, Subscription};
use crate::config::{Config, GameConfig, Mode};
use crate::error::{KomaruError, Result};
use crate::interactor::Interactor;
use crate::pacing::{human_delay, Pacing};
use crate::parser::{parse, split_duration, strings, Card, Outcome};
use crate::shop::{BoosterActivation, Shop, BACK_STEPS};

/// Cooldowns longer than this are worth a time booster.
const LONG_COOLDOWN_SECS: u64 = 3600;

/// A time booster takes this much off the running cooldown.
const TIME_BOOSTER_REDUCTION: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Active,
    Sleepy,
    Resting,
}

/// What to do about the luck booster once we know how many are owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuckPlan {
    UseOwned,
    Buy,
    Leave,
}

pub fn luck_plan(owned: u32, coins: u64, game: &GameConfig) -> LuckPlan {
    if owned > 0 {
        LuckPlan::UseOwned
    } else if coins >= game.luck_booster_cost + game.luck_booster_min_coins_threshold {
        LuckPlan::Buy
    } else {
        LuckPlan::Leave
    }
}

pub fn wants_time_booster(cooldown_secs: u64, roll: f64, chance: f64) -> bool {
    cooldown_secs > LONG_COOLDOWN_SECS && roll < chance
}

pub struct Player {
    config: Config,
    client: Arc<dyn ChatClient>,
    interactor: Arc<Interactor>,
    shop: Shop,
    chat: ChatId,
    events: Subscription,
    coins: u64,
    luck_booster_active: bool,
    state: PlayerState,
    actions_since_rest: u32,
    cooldown_until: Option<Instant>,
}

impl Player {
    /// Resolve the game chat and subscribe to it.
    pub async fn connect(client: Arc<dyn ChatClient>, config: Config) -> Result<Self> {
        let chat = client.resolve_chat(&config.target).await?;
        debug!("Resolved target '{}' to chat {chat}", config.target);

        let events = client.subscribe(chat);
        let interactor = Arc::new(Interactor::new(client.clone(), chat, &config.interactor));
        let shop = Shop::new(interactor.clone());

        Ok(Self {
            config,
            client,
            interactor,
            shop,
            chat,
            events,
            coins: 0,
            luck_booster_active: false,
            state: PlayerState::Active,
            actions_since_rest: 0,
            cooldown_until: None,
        })
    }

    pub fn coins(&self) -> u64 {
        self.coins
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn luck_booster_active(&self) -> bool {
        self.luck_booster_active
    }

    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.cooldown_until
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Play until the chat client disconnects.
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;

        info!("Main loop running");
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.on_event(event).await,
                    None => {
                        warn!("Chat event stream ended");
                        return Ok(());
                    }
                },
                _ = wait_until(self.cooldown_until) => {
                    self.cooldown_until = None;
                    info!("Cooldown cleared");
                    self.decide_and_act().await;
                }
            }
        }
    }

    async fn start(&mut self) -> Result<()> {
        self.refresh_balance().await;
        info!("Analyzing the initial state...");

        match self.config.mode {
            Mode::SemiAutomatic => {
                self.check_boosters().await;
                human_delay(2.0, 5.0).await;
                self.send_card_command().await;
            }
            Mode::Automatic => {
                let last = self.client.last_message(self.chat).await?;
                let cooldown = last
                    .filter(|m| !m.text.is_empty())
                    .and_then(|m| match parse(&m.text) {
                        Outcome::Cooldown { seconds } => Some(seconds),
                        _ => None,
                    });
                match cooldown {
                    Some(seconds) => {
                        info!("Initial state is cooldown");
                        self.on_cooldown(seconds).await;
                    }
                    None => {
                        info!("Initial state is clear");
                        self.decide_and_act().await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::NewMessage(msg) => {
                if msg.outgoing {
                    return;
                }
                if msg.text.is_empty() {
                    debug!("Empty message {} ignored", msg.id);
                    return;
                }
                let outcome = parse(&msg.text);
                debug!("Message {} parsed as {outcome:?}", msg.id);
                match outcome {
                    Outcome::NewCard(card) | Outcome::DuplicateCard(card) => {
                        self.on_card(card).await
                    }
                    Outcome::Cooldown { seconds } => self.on_cooldown(seconds).await,
                    _ => {}
                }
            }
            ChatEvent::MessageEdited(msg) => {
                if parse(&msg.text) != Outcome::CooldownReduced {
                    return;
                }
                match self.config.mode {
                    Mode::SemiAutomatic => self.on_cooldown_reduced().await,
                    Mode::Automatic => debug!("Cooldown reduction ignored in automatic mode"),
                }
            }
        }
    }

    async fn on_card(&mut self, card: Card) {
        self.cooldown_until = None;
        self.coins = card.coins;
        info!("Got card '{}'. Balance: {} 💰", card.name, self.coins);
        self.luck_booster_active = false;
        self.decide_and_act().await;
    }

    async fn on_cooldown(&mut self, seconds: u64) {
        self.cooldown_until = Some(Instant::now() + Duration::from_secs(seconds));
        let (h, m, s) = split_duration(seconds);
        warn!("Cooldown: {h}h {m}m {s}s");

        if self.config.mode == Mode::Automatic {
            let chance = self.config.behavior.use_time_booster_chance;
            if wants_time_booster(seconds, rand::random::<f64>(), chance) {
                info!("Cooldown over an hour, using a time booster...");
                self.apply_time_booster().await;
                info!("Checking new cooldown...");
                human_delay(3.0, 7.0).await;
                self.send_card_command().await;
                return;
            }
            if seconds > LONG_COOLDOWN_SECS {
                info!("Decided to wait instead of using a time booster");
            }
        }
        info!("Waiting {seconds} secs...");
    }

    async fn on_cooldown_reduced(&mut self) {
        let Some(deadline) = self.cooldown_until else {
            debug!("Cooldown reduced while not in cooldown");
            return;
        };
        let now = Instant::now();
        let reduced = deadline
            .checked_sub(TIME_BOOSTER_REDUCTION)
            .map_or(now, |d| d.max(now));
        let remaining = reduced.saturating_duration_since(now);
        let (h, m, s) = split_duration(remaining.as_secs());
        info!("New cooldown duration: {h}h {m}m {s}s");

        if remaining.is_zero() {
            self.cooldown_until = None;
            info!("Cooldown cleared");
            self.decide_and_act().await;
        } else {
            self.cooldown_until = Some(reduced);
            info!("Waiting {} secs...", remaining.as_secs());
        }
    }

    async fn apply_time_booster(&mut self) {
        let name = strings::BOOSTER_TIME;
        let owned = self.shop.booster_count(name).await;
        if owned.count > 0 {
            self.shop.use_booster(name, None).await;
        } else if self.coins >= self.config.game.time_booster_cost {
            if self.shop.buy_booster(name).await {
                self.refresh_balance().await;
                let bought = self.shop.booster_count(name).await;
                if bought.source.is_some() {
                    self.shop.use_booster(name, None).await;
                }
            }
        } else if let Some(screen) = owned.source {
            self.shop.navigate_back(&screen, BACK_STEPS).await;
        }
    }

    async fn decide_and_act(&mut self) {
        self.actions_since_rest += 1;

        let behavior = &self.config.behavior;
        if self.actions_since_rest > behavior.max_actions_before_rest {
            self.state = PlayerState::Sleepy;
            if rand::random::<f64>() < behavior.rest_chance {
                self.rest().await;
            }
        }

        self.check_boosters().await;

        human_delay(10.0, 45.0).await;
        info!("Sending card command");
        self.send_card_command().await;
    }

    async fn rest(&mut self) {
        self.state = PlayerState::Resting;
        let behavior = &self.config.behavior;
        let duration = Pacing::from_secs(
            behavior.rest_duration_min_minutes * 60.0,
            behavior.rest_duration_max_minutes * 60.0,
        )
        .sample();
        info!("Tired, resting for {:.1} minutes", duration.as_secs_f64() / 60.0);
        tokio::time::sleep(duration).await;

        info!("Waking up from rest");
        self.refresh_balance().await;
        self.actions_since_rest = 0;
        self.state = PlayerState::Active;
    }

    async fn check_boosters(&mut self) {
        if rand::random::<f64>() < self.config.behavior.spontaneous_profile_check_chance {
            self.refresh_balance().await;
        }

        let game = &self.config.game;
        if self.luck_booster_active || self.coins <= game.luck_booster_min_coins_threshold {
            return;
        }

        let name = strings::BOOSTER_LUCK;
        let owned = self.shop.booster_count(name).await;
        match luck_plan(owned.count, self.coins, &self.config.game) {
            LuckPlan::UseOwned => {
                let result = self.shop.use_booster(name, owned.source.as_ref()).await;
                self.luck_booster_active = result != BoosterActivation::Failed;
            }
            LuckPlan::Buy => {
                if !self.shop.buy_booster(name).await {
                    return;
                }
                self.refresh_balance().await;
                let bought = self.shop.booster_count(name).await;
                if let Some(screen) = bought.source {
                    let result = self.shop.use_booster(name, Some(&screen)).await;
                    self.luck_booster_active = result != BoosterActivation::Failed;
                }
            }
            LuckPlan::Leave => {
                if let Some(screen) = owned.source {
                    self.shop.navigate_back(&screen, BACK_STEPS).await;
                }
            }
        }
    }

    async fn refresh_balance(&mut self) {
        info!("Updating balance from profile...");
        match self.interactor.send(strings::CMD_PROFILE).await {
            Ok(msg) => self.apply_profile(&msg).await,
            Err(KomaruError::ResponseTimeout) => error!("Bot did not respond to /profile"),
            Err(e) => error!("Profile update failed: {e}"),
        }
    }

    async fn apply_profile(&mut self, msg: &InboundMessage) {
        if msg.text.is_empty() {
            warn!("Profile message has no text, can't update balance");
            return;
        }
        match parse(&msg.text) {
            Outcome::ProfileInfo { coins } => {
                self.coins = coins;
                info!("Balance updated: {coins} 💰");
                human_delay(1.0, 3.0).await;
            }
            _ => {
                let preview: String = msg.text.chars().take(100).collect();
                warn!("Unexpected response to /profile: {preview}");
            }
        }
    }

    async fn send_card_command(&self) {
        if let Err(e) = self.client.send_message(self.chat, strings::CMD_CARD).await {
            error!("Failed to send card command: {e}");
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
