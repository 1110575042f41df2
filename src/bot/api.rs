//! Platform seam for the calls event handlers make.
//!
//! Handlers are generic over [`ChatApi`] so they can run against the
//! throttled bot in production and against in-memory fakes in tests.

use teloxide::prelude::*;
use teloxide::types::{ChatId, LinkPreviewOptions, MessageId, ParseMode, UserId};
use thiserror::Error;

use super::dispatcher::ThrottledBot;
use crate::permissions::MemberStatus;

/// Failure of a single platform call.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The request failed (network, permissions, rate limit...).
    #[error("telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),
}

/// A message that was posted successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// The subset of the Bot API used by the member gate.
#[allow(async_fn_in_trait)]
pub trait ChatApi {
    /// Current status of `user_id` in `chat_id`.
    async fn member_status(&self, chat_id: ChatId, user_id: UserId)
        -> Result<MemberStatus, PlatformError>;

    /// Send an HTML message with link previews disabled.
    async fn send_html(&self, chat_id: ChatId, text: String) -> Result<SentMessage, PlatformError>;

    /// Remove a member from the chat.
    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<(), PlatformError>;

    /// Delete a previously sent message.
    async fn delete_sent(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), PlatformError>;
}

impl ChatApi for ThrottledBot {
    async fn member_status(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<MemberStatus, PlatformError> {
        let member = self.get_chat_member(chat_id, user_id).await?;
        Ok(MemberStatus::from_kind(&member.kind))
    }

    async fn send_html(&self, chat_id: ChatId, text: String) -> Result<SentMessage, PlatformError> {
        let sent = self
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .link_preview_options(LinkPreviewOptions {
                is_disabled: true,
                url: None,
                prefer_small_media: false,
                prefer_large_media: false,
                show_above_text: false,
            })
            .await?;

        Ok(SentMessage {
            chat_id: sent.chat.id,
            message_id: sent.id,
        })
    }

    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<(), PlatformError> {
        // A ban without `until_date` is what the old kickChatMember did.
        self.ban_chat_member(chat_id, user_id).await?;
        Ok(())
    }

    async fn delete_sent(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), PlatformError> {
        self.delete_message(chat_id, message_id).await?;
        Ok(())
    }
}
