//! Permission system for deciding who may add bots to a chat.
//!
//! ## Features
//!
//! - Maps Telegram member kinds onto a flat [`MemberStatus`]
//! - Owner detection (bot owners count as privileged everywhere)
//!
//! ## Usage
//!
//! ```rust
//! let perms = Permissions::with_owners(owner_ids);
//!
//! if perms.is_privileged(&bot, chat_id, user_id).await {
//!     // ...
//! }
//! ```

mod checker;

pub use checker::{MemberStatus, Permissions};
