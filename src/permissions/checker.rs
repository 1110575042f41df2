//! Privilege checker.

use teloxide::types::{ChatId, ChatMemberKind, UserId};
use tracing::{debug, warn};

use crate::bot::ChatApi;

/// Status of a user inside a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberStatus {
    /// Map a teloxide member kind to its status.
    pub fn from_kind(kind: &ChatMemberKind) -> Self {
        match kind {
            ChatMemberKind::Owner { .. } => Self::Creator,
            ChatMemberKind::Administrator { .. } => Self::Administrator,
            ChatMemberKind::Member { .. } => Self::Member,
            ChatMemberKind::Restricted { .. } => Self::Restricted,
            ChatMemberKind::Left { .. } => Self::Left,
            ChatMemberKind::Banned { .. } => Self::Banned,
        }
    }

    /// Creators and administrators are privileged.
    #[inline]
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::Creator | Self::Administrator)
    }
}

/// Permission checker.
///
/// Bot owners (from OWNER_IDS env) are privileged in every chat.
#[derive(Clone, Debug, Default)]
pub struct Permissions {
    owner_ids: Vec<u64>,
}

impl Permissions {
    /// Create a new permission checker with bot owner IDs.
    pub fn with_owners(owner_ids: Vec<u64>) -> Self {
        Self { owner_ids }
    }

    /// Check if a user is a bot owner.
    #[inline]
    pub fn is_bot_owner(&self, user_id: UserId) -> bool {
        self.owner_ids.contains(&user_id.0)
    }

    /// Check whether a user is the chat creator or an administrator.
    ///
    /// Status is always fetched live, admin rights may have changed since the
    /// last event. A failed lookup counts as not privileged.
    pub async fn is_privileged<A: ChatApi>(
        &self,
        api: &A,
        chat_id: ChatId,
        user_id: UserId,
    ) -> bool {
        if self.is_bot_owner(user_id) {
            debug!("User {} is bot owner, treating as privileged", user_id);
            return true;
        }

        match api.member_status(chat_id, user_id).await {
            Ok(status) => {
                debug!("User {} in chat {} has status {:?}", user_id, chat_id, status);
                status.is_privileged()
            }
            Err(e) => {
                warn!(
                    "Failed to fetch status of user {} in chat {}: {}",
                    user_id, chat_id, e
                );
                false
            }
        }
    }
}
