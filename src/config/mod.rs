//! Configuration module for the Gatekeeper bot.
//!
//! Loads configuration from environment variables.

use serde::Deserialize;
use std::env;

/// Group name used when the chat carries no title.
pub const DEFAULT_GROUP_NAME: &str = "PHP Telegram Support Bot";

/// Default disclaimer line appended to every welcome message.
pub const DEFAULT_DISCLAIMER: &str =
    "Please remember that this is <b>NOT</b> the Telegram Support Chat.";

/// Default target of the "Rules" link in the welcome message.
pub const DEFAULT_RULES_URL: &str = "https://telegram.me/PHP_Telegram_Support_Bot?start=";

const DEFAULT_WEBHOOK_PORT: u16 = 8443;

/// Bot running mode
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    #[default]
    Polling,
    Webhook,
}

impl BotMode {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "webhook" => Self::Webhook,
            _ => Self::Polling,
        }
    }
}

/// Texts that make up the fixed part of a welcome message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeTexts {
    /// Fallback group name for chats without a title.
    pub group_name: String,

    /// HTML line stating what the group is not.
    pub disclaimer: String,

    /// URL behind the "Rules" link.
    pub rules_url: String,
}

impl Default for WelcomeTexts {
    fn default() -> Self {
        Self {
            group_name: DEFAULT_GROUP_NAME.to_string(),
            disclaimer: DEFAULT_DISCLAIMER.to_string(),
            rules_url: DEFAULT_RULES_URL.to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub bot_token: String,
    pub bot_mode: BotMode,
    pub webhook_url: Option<String>,
    pub webhook_port: u16,
    pub webhook_secret: Option<String>,

    /// Owner user IDs (comma-separated).
    /// These users may add bots to any chat.
    pub owner_ids: Vec<u64>,

    /// Welcome message texts.
    pub welcome: WelcomeTexts,

    // MongoDB
    pub mongodb_uri: String,
    pub mongodb_database: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Panics
    /// Panics if required environment variables are not set.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let bot_mode = BotMode::parse(&env::var("BOT_MODE").unwrap_or_default());
        let webhook_url = non_empty(env::var("WEBHOOK_URL").ok());

        if bot_mode == BotMode::Webhook && webhook_url.is_none() {
            panic!("WEBHOOK_URL must be set when BOT_MODE is webhook");
        }

        let webhook_port = env::var("WEBHOOK_PORT")
            .ok()
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(DEFAULT_WEBHOOK_PORT);

        let defaults = WelcomeTexts::default();
        let welcome = WelcomeTexts {
            group_name: non_empty(env::var("GROUP_NAME").ok()).unwrap_or(defaults.group_name),
            disclaimer: non_empty(env::var("WELCOME_DISCLAIMER").ok())
                .unwrap_or(defaults.disclaimer),
            rules_url: non_empty(env::var("RULES_URL").ok()).unwrap_or(defaults.rules_url),
        };

        Self {
            bot_token: env::var("BOT_TOKEN").expect("BOT_TOKEN must be set"),
            bot_mode,
            webhook_url,
            webhook_port,
            webhook_secret: non_empty(env::var("WEBHOOK_SECRET").ok()),
            owner_ids: parse_owner_ids(&env::var("OWNER_IDS").unwrap_or_default()),
            welcome,
            mongodb_uri: env::var("MONGODB_URI").expect("MONGODB_URI must be set"),
            mongodb_database: env::var("MONGODB_DATABASE")
                .unwrap_or_else(|_| "gatekeeper".to_string()),
        }
    }
}

/// Parse a comma-separated list of user IDs, skipping anything unparsable.
fn parse_owner_ids(raw: &str) -> Vec<u64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<u64>().ok())
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
