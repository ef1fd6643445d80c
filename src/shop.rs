use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::client::InboundMessage;
use crate::error::{KomaruError, Result};
use crate::interactor::Interactor;
use crate::parser::{booster_quantity, strings};

/// How far `navigate_back` walks after a menu operation.
pub const BACK_STEPS: usize = 3;

/// How many of a booster the inventory holds, and the item screen it was read from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoosterCount {
    pub count: u32,
    pub source: Option<InboundMessage>,
}

impl BoosterCount {
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoosterActivation {
    Activated,
    /// The game answered with an alert instead of a new screen.
    AlreadyActive,
    Failed,
}

/// Result of pressing the final action button on an item screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemAction {
    Confirmed,
    NoReaction,
    Rejected,
}

#[derive(Debug, Clone, Copy)]
enum Step<'a> {
    Send(&'a str),
    Click(&'a str),
}

const INVENTORY_BOOSTERS: [Step<'static>; 3] = [
    Step::Send(strings::CMD_PROFILE),
    Step::Click(strings::BTN_INVENTORY),
    Step::Click(strings::BTN_BOOSTERS),
];

const SHOP_BOOSTERS: [Step<'static>; 2] = [
    Step::Send(strings::CMD_SHOP),
    Step::Click(strings::BTN_BOOSTERS),
];

/// Inventory and shop menus. Public operations never fail: errors are logged,
/// the menu is walked back from the last screen reached and a neutral result
/// is returned.
pub struct Shop {
    interactor: Arc<Interactor>,
}

impl Shop {
    pub fn new(interactor: Arc<Interactor>) -> Self {
        Self { interactor }
    }

    /// Press "back" up to `steps` times, stopping at the first screen without
    /// a back button or on any error.
    pub async fn navigate_back(&self, from: &InboundMessage, steps: usize) {
        let mut current = from.clone();
        for step in 1..=steps {
            let Some(label) = current.find_button(strings::BTN_BACK).map(str::to_string) else {
                break;
            };
            debug!("Navigating back ({step}/{steps})");
            match self.interactor.click(&current, &label).await {
                Ok(msg) => current = msg,
                Err(e) => {
                    debug!("Stopped navigating back: {e}");
                    break;
                }
            }
        }
    }

    pub async fn booster_count(&self, name: &str) -> BoosterCount {
        info!("Checking booster '{name}' in inventory...");
        let mut history = Vec::new();
        let result = self.try_booster_count(name, &mut history).await;
        self.settle("checking inventory", result, &history, BoosterCount::none())
            .await
    }

    pub async fn buy_booster(&self, name: &str) -> bool {
        info!("Trying to buy booster '{name}'...");
        let mut history = Vec::new();
        let result = self
            .item_action(&mut history, name, &SHOP_BOOSTERS, strings::BTN_BUY, strings::BOUGHT)
            .await
            .map(|action| match action {
                ItemAction::Confirmed => {
                    info!("Booster '{name}' bought");
                    true
                }
                ItemAction::NoReaction => {
                    warn!("No confirmation after buying '{name}'");
                    false
                }
                ItemAction::Rejected => {
                    error!("Can't buy '{name}'");
                    false
                }
            });
        self.settle("buying", result, &history, false).await
    }

    /// Activate a booster, either from a known item screen or by walking the
    /// inventory menu.
    pub async fn use_booster(
        &self,
        name: &str,
        from: Option<&InboundMessage>,
    ) -> BoosterActivation {
        info!("Trying to activate booster '{name}'...");
        let mut history = Vec::new();
        let result = match from {
            Some(screen) => {
                debug!("Reusing item screen {}", screen.id);
                history.push(screen.clone());
                self.press_item_button(&mut history, screen, strings::BTN_ACTIVATE, strings::ACTIVATED)
                    .await
            }
            None => {
                self.item_action(
                    &mut history,
                    name,
                    &INVENTORY_BOOSTERS,
                    strings::BTN_ACTIVATE,
                    strings::ACTIVATED,
                )
                .await
            }
        }
        .map(|action| match action {
            ItemAction::Confirmed => {
                info!("Booster '{name}' activated");
                BoosterActivation::Activated
            }
            ItemAction::NoReaction => {
                info!("Booster '{name}' is already active");
                BoosterActivation::AlreadyActive
            }
            ItemAction::Rejected => {
                error!("Can't activate '{name}'");
                BoosterActivation::Failed
            }
        });
        self.settle("activating", result, &history, BoosterActivation::Failed)
            .await
    }

    async fn try_booster_count(
        &self,
        name: &str,
        history: &mut Vec<InboundMessage>,
    ) -> Result<BoosterCount> {
        let menu = self.navigate(history, &INVENTORY_BOOSTERS).await?;
        let Some(label) = menu.find_button(name).map(str::to_string) else {
            info!("Booster '{name}' not found in inventory");
            self.navigate_back(&menu, BACK_STEPS).await;
            return Ok(BoosterCount::none());
        };

        let item = self.interactor.click(&menu, &label).await?;
        history.push(item.clone());
        let count = if item.has_buttons() {
            booster_quantity(&item.text)
        } else {
            None
        };

        match count {
            Some(count) => {
                info!("Found '{name}': {count} pcs.");
                self.navigate_back(&item, BACK_STEPS).await;
                Ok(BoosterCount {
                    count,
                    source: Some(item),
                })
            }
            None => {
                info!("Booster '{name}' not found in inventory");
                self.navigate_back(&item, BACK_STEPS).await;
                Ok(BoosterCount::none())
            }
        }
    }

    async fn item_action(
        &self,
        history: &mut Vec<InboundMessage>,
        name: &str,
        path: &[Step<'_>],
        button: &str,
        success_keyword: &str,
    ) -> Result<ItemAction> {
        let menu = self.navigate(history, path).await?;
        let Some(label) = menu.find_button(name).map(str::to_string) else {
            self.navigate_back(&menu, BACK_STEPS).await;
            return Ok(ItemAction::Rejected);
        };

        let item = self.interactor.click(&menu, &label).await?;
        history.push(item.clone());
        self.press_item_button(history, &item, button, success_keyword)
            .await
    }

    async fn press_item_button(
        &self,
        history: &mut Vec<InboundMessage>,
        item: &InboundMessage,
        button: &str,
        success_keyword: &str,
    ) -> Result<ItemAction> {
        debug!("Screen before clicking '{button}':\n{}", item.text);

        let reply = match self.interactor.click(item, button).await {
            Ok(reply) => reply,
            Err(KomaruError::ResponseTimeout) => {
                warn!("Timeout after clicking '{button}'");
                self.navigate_back(item, BACK_STEPS).await;
                return Ok(ItemAction::NoReaction);
            }
            Err(e) => return Err(e),
        };
        history.push(reply.clone());

        // Unchanged screen: the game answered with a popup alert.
        if reply == *item {
            self.navigate_back(item, BACK_STEPS).await;
            return Ok(ItemAction::NoReaction);
        }

        let action = if reply.text.contains(success_keyword) {
            ItemAction::Confirmed
        } else {
            ItemAction::Rejected
        };
        self.navigate_back(&reply, BACK_STEPS).await;
        Ok(action)
    }

    async fn navigate(
        &self,
        history: &mut Vec<InboundMessage>,
        path: &[Step<'_>],
    ) -> Result<InboundMessage> {
        let mut current: Option<InboundMessage> = None;
        for step in path {
            let next = match (*step, &current) {
                (Step::Send(text), _) => self.interactor.send(text).await?,
                (Step::Click(label), Some(screen)) => self.interactor.click(screen, label).await?,
                (Step::Click(_), None) => return Err(KomaruError::NoButtonsAvailable),
            };
            history.push(next.clone());
            current = Some(next);
        }
        current.ok_or(KomaruError::NoButtonsAvailable)
    }

    /// Log a failed operation, walk back from the last screen reached, and
    /// fall back to `default`.
    async fn settle<T>(
        &self,
        what: &str,
        result: Result<T>,
        history: &[InboundMessage],
        default: T,
    ) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                error!("Error while {what}: {e}");
                if let Some(last) = history.last() {
                    self.navigate_back(last, BACK_STEPS).await;
                }
                default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{edit_of, message, with_buttons, ClickResult, ClickScript, MockClient, CHAT};
    use crate::client::ChatEvent;
    use crate::config::InteractorConfig;
    use crate::pacing::Pacing;

    fn setup() -> (Arc<MockClient>, Shop) {
        let client = MockClient::new();
        let interactor = Interactor::new(client.clone(), CHAT, &InteractorConfig::default())
            .with_pacing(Pacing::none());
        (client, Shop::new(Arc::new(interactor)))
    }

    fn profile() -> InboundMessage {
        with_buttons(
            message(1, "Профиль «Игрок»\n\nМонеты • 80"),
            &[&[strings::BTN_INVENTORY]],
        )
    }

    fn inventory_boosters(profile: &InboundMessage) -> InboundMessage {
        edit_of(
            profile,
            "Бустеры",
            &[&["🍀 Удача [2 шт]", "Ускоритель времени [1 шт]"], &[strings::BTN_BACK]],
        )
    }

    fn luck_item(profile: &InboundMessage) -> InboundMessage {
        edit_of(
            profile,
            "🍀 Удача\n\nУ вас: [2 шт]",
            &[&[strings::BTN_ACTIVATE], &[strings::BTN_BACK]],
        )
    }

    fn edited(msg: InboundMessage) -> ChatEvent {
        ChatEvent::MessageEdited(msg)
    }

    /// Walk back scripts: each back click yields a screen without a back button.
    fn script_back_to_root(client: &MockClient, screen: &InboundMessage) {
        client.script_click(ClickScript::replies(vec![edited(edit_of(
            screen,
            "Профиль",
            &[&[strings::BTN_INVENTORY]],
        ))]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_booster_count_reads_quantity() {
        let (client, shop) = setup();
        let profile = profile();
        let menu = inventory_boosters(&profile);
        let item = luck_item(&profile);

        client.reply_to_send(vec![ChatEvent::NewMessage(profile.clone())]);
        client.script_click(ClickScript::replies(vec![edited(edit_of(
            &profile,
            "Инвентарь",
            &[&[strings::BTN_BOOSTERS], &[strings::BTN_BACK]],
        ))]));
        client.script_click(ClickScript::replies(vec![edited(menu)]));
        client.script_click(ClickScript::replies(vec![edited(item.clone())]));
        script_back_to_root(&client, &item);

        let count = shop.booster_count(strings::BOOSTER_LUCK).await;
        assert_eq!(count.count, 2);
        assert_eq!(count.source, Some(item));
        assert_eq!(
            client.clicked_labels(),
            vec![
                strings::BTN_INVENTORY,
                strings::BTN_BOOSTERS,
                "🍀 Удача [2 шт]",
                strings::BTN_BACK,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_booster_count_missing_item() {
        let (client, shop) = setup();
        let profile = profile();
        client.reply_to_send(vec![ChatEvent::NewMessage(profile.clone())]);
        client.script_click(ClickScript::replies(vec![edited(edit_of(
            &profile,
            "Инвентарь",
            &[&[strings::BTN_BOOSTERS]],
        ))]));
        client.script_click(ClickScript::replies(vec![edited(edit_of(
            &profile,
            "Бустеры",
            &[&["Ускоритель времени [1 шт]"]],
        ))]));

        let count = shop.booster_count(strings::BOOSTER_LUCK).await;
        assert_eq!(count, BoosterCount::none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_booster_count_swallows_errors() {
        let (client, shop) = setup();
        let profile = profile();
        client.reply_to_send(vec![ChatEvent::NewMessage(profile)]);
        client.script_click(ClickScript::failing(ClickResult::NotFound));

        let count = shop.booster_count(strings::BOOSTER_LUCK).await;
        assert_eq!(count, BoosterCount::none());
        // No back button on the profile screen, so nothing else is clicked.
        assert_eq!(client.clicked_labels(), vec![strings::BTN_INVENTORY]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buy_booster_confirmed() {
        let (client, shop) = setup();
        let shop_msg = with_buttons(message(5, "Магазин"), &[&[strings::BTN_BOOSTERS]]);
        let boosters = edit_of(&shop_msg, "Бустеры", &[&["🍀 Удача — 20 💰"], &[strings::BTN_BACK]]);
        let item = edit_of(&shop_msg, "🍀 Удача", &[&[strings::BTN_BUY], &[strings::BTN_BACK]]);
        let done = edit_of(&shop_msg, "Бустер «удача» куплен!", &[&[strings::BTN_BACK]]);

        client.reply_to_send(vec![ChatEvent::NewMessage(shop_msg.clone())]);
        client.script_click(ClickScript::replies(vec![edited(boosters)]));
        client.script_click(ClickScript::replies(vec![edited(item)]));
        client.script_click(ClickScript::replies(vec![edited(done.clone())]));
        script_back_to_root(&client, &done);

        assert!(shop.buy_booster(strings::BOOSTER_LUCK).await);
        assert_eq!(client.sent(), vec![strings::CMD_SHOP]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buy_booster_not_enough_coins() {
        let (client, shop) = setup();
        let shop_msg = with_buttons(message(5, "Магазин"), &[&[strings::BTN_BOOSTERS]]);
        let boosters = edit_of(&shop_msg, "Бустеры", &[&["🍀 Удача — 20 💰"]]);
        let item = edit_of(&shop_msg, "🍀 Удача", &[&[strings::BTN_BUY]]);
        let refused = edit_of(&shop_msg, "Недостаточно монет", &[&["x"]]);

        client.reply_to_send(vec![ChatEvent::NewMessage(shop_msg)]);
        client.script_click(ClickScript::replies(vec![edited(boosters)]));
        client.script_click(ClickScript::replies(vec![edited(item)]));
        client.script_click(ClickScript::replies(vec![edited(refused)]));

        assert!(!shop.buy_booster(strings::BOOSTER_LUCK).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_use_booster_from_known_screen() {
        let (client, shop) = setup();
        let item = luck_item(&profile());
        let confirmed = message(9, "Бустер «удача» активирован");
        client.script_click(ClickScript::replies(vec![ChatEvent::NewMessage(confirmed)]));

        let result = shop.use_booster(strings::BOOSTER_LUCK, Some(&item)).await;
        assert_eq!(result, BoosterActivation::Activated);
        assert_eq!(client.clicked_labels(), vec![strings::BTN_ACTIVATE]);
        assert!(client.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_use_booster_alert_means_already_active() {
        let (client, shop) = setup();
        let item = luck_item(&profile());
        // Click acknowledged, nothing visible happens.
        client.script_click(ClickScript::ok());
        script_back_to_root(&client, &item);

        let result = shop.use_booster(strings::BOOSTER_LUCK, Some(&item)).await;
        assert_eq!(result, BoosterActivation::AlreadyActive);
        assert_eq!(
            client.clicked_labels(),
            vec![strings::BTN_ACTIVATE, strings::BTN_BACK]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_use_booster_error_navigates_back() {
        let (client, shop) = setup();
        let item = luck_item(&profile());
        client.script_click(ClickScript::failing(ClickResult::Fail("MESSAGE_ID_INVALID".into())));
        script_back_to_root(&client, &item);

        let result = shop.use_booster(strings::BOOSTER_LUCK, Some(&item)).await;
        assert_eq!(result, BoosterActivation::Failed);
        assert_eq!(
            client.clicked_labels(),
            vec![strings::BTN_ACTIVATE, strings::BTN_BACK]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigate_back_stops_without_back_button() {
        let (client, shop) = setup();
        let screen = with_buttons(message(3, "a"), &[&[strings::BTN_BACK]]);
        let mid = edit_of(&screen, "b", &[&[strings::BTN_BACK]]);
        let root = edit_of(&screen, "c", &[&["🎒 Инвентарь"]]);
        client.script_click(ClickScript::replies(vec![edited(mid)]));
        client.script_click(ClickScript::replies(vec![edited(root)]));

        shop.navigate_back(&screen, BACK_STEPS).await;
        assert_eq!(client.clicked_labels().len(), 2);
    }
}
