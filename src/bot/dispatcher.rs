//! Message dispatcher setup.
//!
//! Builds the dispatcher with the member event handlers.

use std::sync::Arc;

use teloxide::adaptors::Throttle;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;

use crate::cache::CacheRegistry;
use crate::config::WelcomeTexts;
use crate::database::{Database, OptionRepository};
use crate::events;
use crate::permissions::Permissions;

/// Bot type with Throttle adaptor for automatic rate limiting.
pub type ThrottledBot = Throttle<Bot>;

/// Dispatcher type shared by the polling and webhook runners.
pub type BotDispatcher =
    Dispatcher<ThrottledBot, anyhow::Error, teloxide::dispatching::DefaultKey>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Chat-scoped option storage (welcome pointer lives here).
    pub options: Arc<OptionRepository>,

    /// Privilege checker (bot owners bypass).
    pub permissions: Permissions,

    /// Fixed parts of the welcome message.
    pub welcome: Arc<WelcomeTexts>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        db: &Database,
        cache: &CacheRegistry,
        owner_ids: Vec<u64>,
        welcome: WelcomeTexts,
    ) -> Self {
        Self {
            options: Arc::new(OptionRepository::new(db, cache)),
            permissions: Permissions::with_owners(owner_ids),
            welcome: Arc::new(welcome),
        }
    }
}

/// Build the dispatcher with all handlers.
pub fn build_dispatcher(bot: ThrottledBot, state: AppState) -> BotDispatcher {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
}

/// Build the handler schema.
fn schema() -> UpdateHandler<anyhow::Error> {
    use teloxide::dispatching::UpdateFilterExt;

    Update::filter_message().branch(events::message_event_handler())
}
