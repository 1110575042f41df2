//! Simple option repository with read-through caching.
//!
//! Options change at most once per join event, so entries live for 5 minutes.

use std::time::Duration;

use anyhow::Result;
use mongodb::bson::doc;
use mongodb::Collection;
use tracing::{debug, warn};

use super::OptionStore;
use crate::cache::{CacheConfig, CacheRegistry, TypedCache};
use crate::database::models::SimpleOption;
use crate::database::Database;

/// Collection holding [`SimpleOption`] documents.
pub const OPTIONS_COLLECTION: &str = "simple_options";

type OptionKey = (i64, String); // (chat_id, name)

/// Cache bookkeeping for options.
///
/// Misses are cached too, as `Some(None)`.
#[derive(Clone, Debug)]
struct OptionCache {
    inner: TypedCache<OptionKey, Option<String>>,
}

impl OptionCache {
    fn new(registry: &CacheRegistry) -> Self {
        Self {
            inner: registry.get_or_create(
                "simple_options",
                CacheConfig::with_capacity(2_000).ttl(Duration::from_secs(300)),
            ),
        }
    }

    /// `None` means the DB must be asked, `Some(None)` is a known miss.
    fn lookup(&self, key: &OptionKey) -> Option<Option<String>> {
        self.inner.get(key)
    }

    /// Remember what the DB returned for `key`, present or not.
    fn loaded(&self, key: OptionKey, value: Option<String>) {
        self.inner.insert(key, value);
    }

    /// Record the outcome of a write to `key`.
    fn written(&self, key: OptionKey, value: &str, ok: bool) {
        if ok {
            self.inner.insert(key, Some(value.to_string()));
        } else {
            // The stored value is unknown now, force the next read to hit the DB
            self.inner.invalidate(&key);
        }
    }
}

/// Repository for chat-scoped simple options.
pub struct OptionRepository {
    collection: Collection<SimpleOption>,
    cache: OptionCache,
}

impl OptionRepository {
    pub fn new(db: &Database, cache: &CacheRegistry) -> Self {
        Self {
            collection: db.collection(OPTIONS_COLLECTION),
            cache: OptionCache::new(cache),
        }
    }
}

impl OptionStore for OptionRepository {
    async fn get(&self, chat_id: i64, name: &str) -> Result<Option<String>> {
        let key = (chat_id, name.to_string());
        if let Some(cached) = self.cache.lookup(&key) {
            return Ok(cached);
        }

        let filter = doc! { "chat_id": chat_id, "name": name };
        let value = self.collection.find_one(filter).await?.map(|o| o.value);
        debug!("DB get option {} for chat {}: {:?}", name, chat_id, value);

        self.cache.loaded(key, value.clone());
        Ok(value)
    }

    async fn set(&self, chat_id: i64, name: &str, value: &str) -> Result<()> {
        let key = (chat_id, name.to_string());
        let filter = doc! { "chat_id": chat_id, "name": name };
        let option = SimpleOption::new(chat_id, name, value);
        let options = mongodb::options::ReplaceOptions::builder()
            .upsert(true)
            .build();

        let result = self
            .collection
            .replace_one(filter, &option)
            .with_options(options)
            .await;

        self.cache.written(key, value, result.is_ok());

        if let Err(e) = result {
            warn!("Failed to save option {} for chat {}: {}", name, chat_id, e);
            return Err(e.into());
        }

        debug!("Saved option {} for chat {}", name, chat_id);
        Ok(())
    }
}
