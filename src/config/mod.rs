use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KomaruError, Result};
use crate::pacing::{secs, Pacing};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Username or numeric id of the game bot.
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub interactor: InteractorConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
}

fn default_target() -> String {
    "KomaruCardsBot".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: default_target(),
            mode: Mode::default(),
            debug_logging: false,
            client: ClientConfig::default(),
            interactor: InteractorConfig::default(),
            game: GameConfig::default(),
            behavior: BehaviorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Waits for the user to trigger cards; only reacts to replies.
    #[default]
    SemiAutomatic,
    /// Sends the card command itself and manages cooldowns.
    Automatic,
}

/// Sidecar process that owns the user session (stdio transport).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_client_command() -> String {
    "komaru-bridge".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command: default_client_command(),
            args: vec![],
            env: HashMap::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractorConfig {
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: f64,
    #[serde(default = "default_click_grace")]
    pub click_grace_secs: f64,
    #[serde(default = "default_pacing_min")]
    pub pacing_min_secs: f64,
    #[serde(default = "default_pacing_max")]
    pub pacing_max_secs: f64,
}

fn default_response_timeout() -> f64 {
    5.0
}
fn default_click_grace() -> f64 {
    2.0
}
fn default_pacing_min() -> f64 {
    0.6
}
fn default_pacing_max() -> f64 {
    3.2
}

impl Default for InteractorConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_response_timeout(),
            click_grace_secs: default_click_grace(),
            pacing_min_secs: default_pacing_min(),
            pacing_max_secs: default_pacing_max(),
        }
    }
}

impl InteractorConfig {
    pub fn response_timeout(&self) -> Duration {
        secs(self.response_timeout_secs)
    }

    pub fn click_grace(&self) -> Duration {
        secs(self.click_grace_secs)
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::from_secs(self.pacing_min_secs, self.pacing_max_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default = "default_time_booster_cost")]
    pub time_booster_cost: u64,
    #[serde(default = "default_luck_booster_cost")]
    pub luck_booster_cost: u64,
    #[serde(default = "default_luck_threshold")]
    pub luck_booster_min_coins_threshold: u64,
}

fn default_time_booster_cost() -> u64 {
    15
}
fn default_luck_booster_cost() -> u64 {
    20
}
fn default_luck_threshold() -> u64 {
    45
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            time_booster_cost: default_time_booster_cost(),
            luck_booster_cost: default_luck_booster_cost(),
            luck_booster_min_coins_threshold: default_luck_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "default_time_booster_chance")]
    pub use_time_booster_chance: f64,
    #[serde(default = "default_profile_check_chance")]
    pub spontaneous_profile_check_chance: f64,
    #[serde(default = "default_max_actions")]
    pub max_actions_before_rest: u32,
    #[serde(default = "default_rest_chance")]
    pub rest_chance: f64,
    #[serde(default = "default_rest_min")]
    pub rest_duration_min_minutes: f64,
    #[serde(default = "default_rest_max")]
    pub rest_duration_max_minutes: f64,
}

fn default_time_booster_chance() -> f64 {
    0.8
}
fn default_profile_check_chance() -> f64 {
    0.05
}
fn default_max_actions() -> u32 {
    25
}
fn default_rest_chance() -> f64 {
    0.5
}
fn default_rest_min() -> f64 {
    45.0
}
fn default_rest_max() -> f64 {
    75.0
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            use_time_booster_chance: default_time_booster_chance(),
            spontaneous_profile_check_chance: default_profile_check_chance(),
            max_actions_before_rest: default_max_actions(),
            rest_chance: default_rest_chance(),
            rest_duration_min_minutes: default_rest_min(),
            rest_duration_max_minutes: default_rest_max(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KomaruError::Config(format!("Failed to read config: {e}")))?;
        let content = substitute_env_vars(&content);
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.trim().is_empty() {
            return Err(KomaruError::Config("target must not be empty".into()));
        }
        if self.client.command.trim().is_empty() {
            return Err(KomaruError::Config("client.command must not be empty".into()));
        }
        let chances = [
            ("behavior.use_time_booster_chance", self.behavior.use_time_booster_chance),
            (
                "behavior.spontaneous_profile_check_chance",
                self.behavior.spontaneous_profile_check_chance,
            ),
            ("behavior.rest_chance", self.behavior.rest_chance),
        ];
        for (name, value) in chances {
            if !(0.0..=1.0).contains(&value) {
                return Err(KomaruError::Config(format!(
                    "{name} must be between 0 and 1, got {value}"
                )));
            }
        }
        if self.behavior.rest_duration_min_minutes > self.behavior.rest_duration_max_minutes {
            return Err(KomaruError::Config(
                "behavior.rest_duration_min_minutes exceeds rest_duration_max_minutes".into(),
            ));
        }
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        komaru_dir().join("config.toml")
    }

    pub fn default_toml() -> &'static str {
        r#"target = "KomaruCardsBot"
mode = "semi-automatic"
debug_logging = true

# Sidecar that owns the Telegram user session and speaks JSON lines on stdio
# (protocol in README.md). komaru does not log in to Telegram itself.
[client]
command = "komaru-bridge"
args = []
env = { TG_API_ID = "${TG_API_ID}", TG_API_HASH = "${TG_API_HASH}" }
request_timeout_secs = 30

[interactor]
response_timeout_secs = 5
click_grace_secs = 2
pacing_min_secs = 0.6
pacing_max_secs = 3.2

[game]
time_booster_cost = 15
luck_booster_cost = 20
luck_booster_min_coins_threshold = 45

[behavior]
use_time_booster_chance = 0.8
spontaneous_profile_check_chance = 0.05
max_actions_before_rest = 25
rest_chance = 0.5
rest_duration_min_minutes = 45
rest_duration_max_minutes = 75
"#
    }
}

pub fn komaru_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".komaru")
}

/// Substitute `${VAR_NAME}` patterns with environment variable values.
pub fn substitute_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .to_string()
}
