use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Game vocabulary: commands, button labels and reply keywords.
pub mod strings {
    pub const CMD_CARD: &str = "камар";
    pub const CMD_PROFILE: &str = "/profile";
    pub const CMD_SHOP: &str = "/shop";

    pub const CARD_INTROS: [&str; 5] = [
        "Вы нашли карточку",
        "Коллекция пополнилась карточкой",
        "Новая карточка —",
        "Карточка",
        "Успех! Карточка",
    ];
    pub const CARD_SUFFIX_YOURS: &str = "ваша!";
    pub const DUPLICATE_MARKERS: [&str; 3] = ["уже у вас", "у вас повторно", "уже в коллекции!"];

    pub const RARITY: &str = "Редкость";
    pub const POINTS: &str = "Очки";
    pub const COINS: &str = "Монеты";
    pub const LUCK_BOOSTER_USED: &str = "Бустер «удача»";

    pub const PROFILE_TITLE: &str = "Профиль «";
    pub const COOLDOWN_INTROS: [&str; 4] = [
        "Подождите",
        "Попробуйте снова через",
        "Попробуйте через",
        "Возвращайтесь через",
    ];
    pub const COOLDOWN_REDUCED: &str = "Бустер «ускоритель времени» активирован";
    pub const BOUGHT: &str = "куплен";
    pub const ACTIVATED: &str = "активирован";

    pub const BTN_INVENTORY: &str = "🎒 Инвентарь";
    pub const BTN_BOOSTERS: &str = "⚡️ Бустеры";
    pub const BTN_BUY: &str = "Купить";
    pub const BTN_ACTIVATE: &str = "Активировать";
    pub const BTN_BACK: &str = "‹ Назад";

    pub const BOOSTER_LUCK: &str = "🍀 Удача";
    pub const BOOSTER_TIME: &str = "Ускоритель времени";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Card {
    pub name: String,
    pub rarity: String,
    /// Point total after this card.
    pub points: u64,
    /// Coin total after this card.
    pub coins: u64,
    pub booster_used: Option<String>,
}

/// Classification of a game bot reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    NewCard(Card),
    DuplicateCard(Card),
    Cooldown { seconds: u64 },
    CooldownReduced,
    ProfileInfo { coins: u64 },
    Unknown,
}

static FORMATTING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*|__|\*|`").unwrap());

static CARD: LazyLock<Regex> = LazyLock::new(|| {
    let intros = alternation(&strings::CARD_INTROS);
    let mut suffixes = strings::DUPLICATE_MARKERS.to_vec();
    suffixes.push(strings::CARD_SUFFIX_YOURS);
    let suffixes = alternation(&suffixes);
    Regex::new(&format!(
        r"(?m)(?:{intros}) «(.+?)»(?: (?:{suffixes}))?.*?\n\n.*?{rarity} • (.+?)\n.*?{points} • [+-]?[\d, ]+ \[(.+)\]\n.*?{coins} • [+-]?[\d, ]+ \[(.+)\]",
        rarity = regex::escape(strings::RARITY),
        points = regex::escape(strings::POINTS),
        coins = regex::escape(strings::COINS),
    ))
    .unwrap()
});

static PROFILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?s){title}.+?\n\n.*?{coins} • ([\d,]+)",
        title = regex::escape(strings::PROFILE_TITLE),
        coins = regex::escape(strings::COINS),
    ))
    .unwrap()
});

static COOLDOWN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?:{}) (?:(\d+)ч\. )?(?:(\d+)мин\. )?(\d+)сек\.",
        alternation(&strings::COOLDOWN_INTROS)
    ))
    .unwrap()
});

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+) шт\]").unwrap());

fn alternation(words: &[&str]) -> String {
    words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|")
}

/// Strip markdown markers and zero-width spaces.
pub fn clean_text(text: &str) -> String {
    FORMATTING.replace_all(text, "").replace('\u{200b}', "")
}

fn to_number(s: &str) -> Option<u64> {
    s.chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect::<String>()
        .parse()
        .ok()
}

pub fn parse(text: &str) -> Outcome {
    let text = clean_text(text);

    if let Some(caps) = CARD.captures(&text) {
        if let (Some(points), Some(coins)) = (to_number(&caps[3]), to_number(&caps[4])) {
            let card = Card {
                name: caps[1].to_string(),
                rarity: caps[2].trim().to_string(),
                points,
                coins,
                booster_used: text
                    .contains(strings::LUCK_BOOSTER_USED)
                    .then(|| strings::BOOSTER_LUCK.to_string()),
            };
            let duplicate = strings::DUPLICATE_MARKERS.iter().any(|m| text.contains(m));
            return if duplicate {
                Outcome::DuplicateCard(card)
            } else {
                Outcome::NewCard(card)
            };
        }
    }

    if let Some(coins) = PROFILE.captures(&text).and_then(|c| to_number(&c[1])) {
        return Outcome::ProfileInfo { coins };
    }

    if let Some(caps) = COOLDOWN.captures(&text) {
        let part = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(0)
        };
        return Outcome::Cooldown {
            seconds: part(1) * 3600 + part(2) * 60 + part(3),
        };
    }

    if text.contains(strings::COOLDOWN_REDUCED) {
        return Outcome::CooldownReduced;
    }

    Outcome::Unknown
}

/// Quantity shown on an inventory item screen (`[N шт]`).
pub fn booster_quantity(text: &str) -> Option<u32> {
    QUANTITY
        .captures(&clean_text(text))
        .and_then(|c| c[1].parse().ok())
}

/// `h`, `m`, `s` split of a cooldown for display.
pub fn split_duration(seconds: u64) -> (u64, u64, u64) {
    (seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEW_CARD: &str = "🃏 Вы нашли карточку «Комару-повар» ваша!\n\n\
        💎 Редкость • Редкая\n\
        ✨ Очки • +1,000 [12,500]\n\
        💰 Монеты • +5 [120]";

    #[test]
    fn test_parse_new_card() {
        let outcome = parse(NEW_CARD);
        assert_eq!(
            outcome,
            Outcome::NewCard(Card {
                name: "Комару-повар".into(),
                rarity: "Редкая".into(),
                points: 12_500,
                coins: 120,
                booster_used: None,
            })
        );
    }

    #[test]
    fn test_parse_duplicate_card_with_booster_and_formatting() {
        let text = "**Карточка «Спящий Комару» уже у вас**\n\n\
            Редкость • Обычная\n\
            Очки • +200 [1 300]\n\
            Монеты • +2 [47]\n\
            🍀 Бустер «удача» сработал";
        match parse(text) {
            Outcome::DuplicateCard(card) => {
                assert_eq!(card.name, "Спящий Комару");
                assert_eq!(card.points, 1300);
                assert_eq!(card.coins, 47);
                assert_eq!(card.booster_used.as_deref(), Some(strings::BOOSTER_LUCK));
            }
            other => panic!("expected duplicate card, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_profile() {
        let text = "👤 Профиль «Игрок»\n\nКарточек • 52\n💰 Монеты • 1,234";
        assert_eq!(parse(text), Outcome::ProfileInfo { coins: 1234 });
    }

    #[test]
    fn test_parse_cooldown_variants() {
        assert_eq!(
            parse("Подождите 1ч. 2мин. 3сек. перед следующей попыткой"),
            Outcome::Cooldown { seconds: 3723 }
        );
        assert_eq!(
            parse("Попробуйте снова через 15мин. 0сек."),
            Outcome::Cooldown { seconds: 900 }
        );
        assert_eq!(
            parse("Возвращайтесь через 42сек."),
            Outcome::Cooldown { seconds: 42 }
        );
    }

    #[test]
    fn test_parse_cooldown_reduced_and_unknown() {
        assert_eq!(
            parse("⏳ Бустер «ускоритель времени» активирован!"),
            Outcome::CooldownReduced
        );
        assert_eq!(parse("Привет!"), Outcome::Unknown);
        assert_eq!(parse(""), Outcome::Unknown);
    }

    #[test]
    fn test_zero_width_spaces_are_ignored() {
        let text = "Подождите\u{200b} 5сек.";
        assert_eq!(parse(text), Outcome::Cooldown { seconds: 5 });
    }

    #[test]
    fn test_booster_quantity() {
        assert_eq!(booster_quantity("🍀 Удача\n\nУ вас: **[3 шт]**"), Some(3));
        assert_eq!(booster_quantity("🍀 Удача"), None);
    }

    #[test]
    fn test_split_duration() {
        assert_eq!(split_duration(3723), (1, 2, 3));
        assert_eq!(split_duration(59), (0, 0, 59));
    }
}
