//! Repository module - data access layer.

mod option_repository;

pub use option_repository::{OPTIONS_COLLECTION, OptionRepository};

/// Key-value option storage scoped per chat.
///
/// `set` has upsert semantics: the previous value for the same
/// `(chat_id, name)` is replaced, never appended to.
#[allow(async_fn_in_trait)]
pub trait OptionStore {
    /// Read an option, `None` if it was never set.
    async fn get(&self, chat_id: i64, name: &str) -> anyhow::Result<Option<String>>;

    /// Insert or overwrite an option.
    async fn set(&self, chat_id: i64, name: &str, value: &str) -> anyhow::Result<()>;
}
