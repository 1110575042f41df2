//! Simple key-value option model.
//!
//! One document per `(chat_id, name)` pair in the `simple_options` collection.

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// A named option value scoped to one chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleOption {
    /// MongoDB document ID
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Telegram chat ID the option belongs to
    pub chat_id: i64,

    /// Option name, e.g. `welcome_message_id`
    pub name: String,

    /// Raw option value
    pub value: String,

    /// Unix timestamp of the last write
    pub updated_at: i64,
}

impl SimpleOption {
    /// Create a new option stamped with the current time.
    pub fn new(chat_id: i64, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: None,
            chat_id,
            name: name.into(),
            value: value.into(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}
