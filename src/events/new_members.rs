//! New chat members event handler.
//!
//! On every "new chat members" service message:
//! - bots added by a non-admin are removed from the chat
//! - human members get a welcome message, replacing the previous one

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, User, UserId};
use tracing::{debug, info, warn};

use crate::bot::dispatcher::{AppState, ThrottledBot};
use crate::bot::{ChatApi, SentMessage};
use crate::config::WelcomeTexts;
use crate::database::OptionStore;
use crate::permissions::Permissions;
use crate::utils::user_mention;

/// Option holding the id of the last welcome message in a chat.
pub const WELCOME_MESSAGE_OPTION: &str = "welcome_message_id";

/// A member that was just added to a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: UserId,
    pub display_name: String,
    pub is_bot: bool,
}

impl From<&User> for Member {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            display_name: user.first_name.clone(),
            is_bot: user.is_bot,
        }
    }
}

/// One "members added" event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEvent {
    pub chat_id: ChatId,
    /// User who added the members (equal to the member for self-joins).
    pub actor_user_id: UserId,
    pub group_name: String,
    pub added_members: Vec<Member>,
}

impl MemberEvent {
    /// Build an event from a `new_chat_members` service message.
    ///
    /// Returns `None` for other messages and for messages without a sender.
    pub fn from_message(msg: &Message, fallback_group_name: &str) -> Option<Self> {
        let members = msg.new_chat_members()?;
        let actor = msg.from.as_ref()?;

        Some(Self {
            chat_id: msg.chat.id,
            actor_user_id: actor.id,
            group_name: msg
                .chat
                .title()
                .unwrap_or(fallback_group_name)
                .to_string(),
            added_members: members.iter().map(Member::from).collect(),
        })
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WelcomeOutcome {
    /// Nothing was posted: no human members, or the send failed.
    Empty,
    /// A welcome message was posted.
    Sent(SentMessage),
}

/// Split members into `(users, bots)`, keeping their relative order.
pub fn partition_members(members: &[Member]) -> (Vec<&Member>, Vec<&Member>) {
    members.iter().partition(|m| !m.is_bot)
}

/// Render the welcome message for the given human members.
///
/// Display names are escaped, the group name is used as-is.
pub fn render_welcome_text(users: &[&Member], group_name: &str, texts: &WelcomeTexts) -> String {
    let mentions = users
        .iter()
        .map(|u| user_mention(u.id, &u.display_name))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Welcome {} to the <b>{}</b> group\n{}\nRead the <a href=\"{}\">Rules</a> that apply here.",
        mentions, group_name, texts.disclaimer, texts.rules_url
    )
}

/// Gates new bots and (re)posts the welcome message.
pub struct NewMemberWelcomeHandler<'a, A, S> {
    api: &'a A,
    store: &'a S,
    permissions: &'a Permissions,
    texts: &'a WelcomeTexts,
}

impl<'a, A, S> NewMemberWelcomeHandler<'a, A, S>
where
    A: ChatApi,
    S: OptionStore,
{
    pub fn new(
        api: &'a A,
        store: &'a S,
        permissions: &'a Permissions,
        texts: &'a WelcomeTexts,
    ) -> Self {
        Self {
            api,
            store,
            permissions,
            texts,
        }
    }

    /// Process one event end-to-end.
    ///
    /// Platform failures are logged and absorbed; store failures propagate.
    pub async fn handle(&self, event: &MemberEvent) -> anyhow::Result<WelcomeOutcome> {
        let (users, bots) = partition_members(&event.added_members);
        debug!(
            "Chat {}: {} new users, {} new bots",
            event.chat_id,
            users.len(),
            bots.len()
        );

        self.kick_disallowed_bots(event, &bots).await;

        self.refresh_welcome_message(event, &users).await
    }

    /// Remove bots unless the actor is privileged. Skips the status query
    /// entirely when no bots were added.
    ///
    /// Bot owners from `OWNER_IDS` count as privileged in every chat, so bots
    /// they add are kept even if they are not admins there. With no owners
    /// configured only the creator and administrators may add bots.
    async fn kick_disallowed_bots(&self, event: &MemberEvent, bots: &[&Member]) {
        if bots.is_empty() {
            return;
        }

        if self
            .permissions
            .is_privileged(self.api, event.chat_id, event.actor_user_id)
            .await
        {
            debug!(
                "User {} may add bots to chat {}",
                event.actor_user_id, event.chat_id
            );
            return;
        }

        for bot in bots {
            match self.api.remove_member(event.chat_id, bot.id).await {
                Ok(()) => info!(
                    "Removed bot {} added by {} in chat {}",
                    bot.id, event.actor_user_id, event.chat_id
                ),
                Err(e) => warn!(
                    "Failed to remove bot {} from chat {}: {}",
                    bot.id, event.chat_id, e
                ),
            }
        }
    }

    async fn refresh_welcome_message(
        &self,
        event: &MemberEvent,
        users: &[&Member],
    ) -> anyhow::Result<WelcomeOutcome> {
        if users.is_empty() {
            return Ok(WelcomeOutcome::Empty);
        }

        let text = render_welcome_text(users, &event.group_name, self.texts);

        let sent = match self.api.send_html(event.chat_id, text).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!("Failed to send welcome message to chat {}: {}", event.chat_id, e);
                return Ok(WelcomeOutcome::Empty);
            }
        };

        info!(
            "Sent welcome message {} for {} users in chat {}",
            sent.message_id.0,
            users.len(),
            sent.chat_id
        );

        if sent.message_id.0 != 0 && sent.chat_id.0 != 0 {
            self.replace_pointer(sent).await?;
        }

        Ok(WelcomeOutcome::Sent(sent))
    }

    /// Delete the previous welcome message and store the new id.
    async fn replace_pointer(&self, sent: SentMessage) -> anyhow::Result<()> {
        let chat_id = sent.chat_id;

        if let Some(previous) = self.store.get(chat_id.0, WELCOME_MESSAGE_OPTION).await? {
            match previous.parse::<i32>() {
                Ok(id) => {
                    if let Err(e) = self.api.delete_sent(chat_id, MessageId(id)).await {
                        warn!(
                            "Failed to delete old welcome message {} in chat {}: {}",
                            id, chat_id, e
                        );
                    }
                }
                Err(_) => warn!(
                    "Ignoring malformed {} '{}' in chat {}",
                    WELCOME_MESSAGE_OPTION, previous, chat_id
                ),
            }
        }

        self.store
            .set(
                chat_id.0,
                WELCOME_MESSAGE_OPTION,
                &sent.message_id.0.to_string(),
            )
            .await
    }
}

/// Returns the handler for `new_chat_members` service messages.
pub fn handler() -> UpdateHandler<anyhow::Error> {
    dptree::filter(|msg: Message| {
        msg.new_chat_members().is_some() && (msg.chat.is_group() || msg.chat.is_supergroup())
    })
    .endpoint(new_members_handler)
}

async fn new_members_handler(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
) -> anyhow::Result<()> {
    let Some(event) = MemberEvent::from_message(&msg, &state.welcome.group_name) else {
        debug!("Skipping member event without sender in chat {}", msg.chat.id);
        return Ok(());
    };

    let handler = NewMemberWelcomeHandler::new(
        &bot,
        state.options.as_ref(),
        &state.permissions,
        &state.welcome,
    );
    handler.handle(&event).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};

    use parking_lot::Mutex;
    use teloxide::{ApiError, RequestError};

    use super::*;
    use crate::bot::api::PlatformError;
    use crate::permissions::MemberStatus;

    const CHAT: ChatId = ChatId(7);
    const ACTOR: UserId = UserId(500);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Status(ChatId, UserId),
        Send(ChatId, String),
        Remove(ChatId, UserId),
        Delete(ChatId, MessageId),
    }

    fn api_error() -> PlatformError {
        PlatformError::Request(RequestError::Api(ApiError::Unknown("boom".into())))
    }

    #[derive(Default)]
    struct FakeApi {
        /// `None` makes the status query fail.
        status: Option<MemberStatus>,
        fail_send: bool,
        fail_delete: bool,
        fail_remove: Vec<UserId>,
        message_ids: Mutex<VecDeque<i32>>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeApi {
        fn with_status(status: MemberStatus) -> Self {
            Self {
                status: Some(status),
                ..Default::default()
            }
        }

        fn queue_ids(self, ids: &[i32]) -> Self {
            self.message_ids.lock().extend(ids.iter().copied());
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.lock().iter().filter(|c| pred(*c)).count()
        }
    }

    impl ChatApi for FakeApi {
        async fn member_status(
            &self,
            chat_id: ChatId,
            user_id: UserId,
        ) -> Result<MemberStatus, PlatformError> {
            self.calls.lock().push(Call::Status(chat_id, user_id));
            self.status.ok_or_else(api_error)
        }

        async fn send_html(
            &self,
            chat_id: ChatId,
            text: String,
        ) -> Result<SentMessage, PlatformError> {
            self.calls.lock().push(Call::Send(chat_id, text));
            if self.fail_send {
                return Err(api_error());
            }
            let id = self.message_ids.lock().pop_front().unwrap_or(1);
            Ok(SentMessage {
                chat_id,
                message_id: MessageId(id),
            })
        }

        async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<(), PlatformError> {
            self.calls.lock().push(Call::Remove(chat_id, user_id));
            if self.fail_remove.contains(&user_id) {
                return Err(api_error());
            }
            Ok(())
        }

        async fn delete_sent(
            &self,
            chat_id: ChatId,
            message_id: MessageId,
        ) -> Result<(), PlatformError> {
            self.calls.lock().push(Call::Delete(chat_id, message_id));
            if self.fail_delete {
                return Err(api_error());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeStore {
        values: Mutex<HashMap<(i64, String), String>>,
        writes: Mutex<usize>,
        fail_get: bool,
    }

    impl FakeStore {
        fn pointer(&self, chat_id: ChatId) -> Option<String> {
            self.values
                .lock()
                .get(&(chat_id.0, WELCOME_MESSAGE_OPTION.to_string()))
                .cloned()
        }
    }

    impl OptionStore for FakeStore {
        async fn get(&self, chat_id: i64, name: &str) -> anyhow::Result<Option<String>> {
            if self.fail_get {
                anyhow::bail!("store unavailable");
            }
            Ok(self.values.lock().get(&(chat_id, name.to_string())).cloned())
        }

        async fn set(&self, chat_id: i64, name: &str, value: &str) -> anyhow::Result<()> {
            *self.writes.lock() += 1;
            self.values
                .lock()
                .insert((chat_id, name.to_string()), value.to_string());
            Ok(())
        }
    }

    fn user(id: u64, name: &str) -> Member {
        Member {
            id: UserId(id),
            display_name: name.to_string(),
            is_bot: false,
        }
    }

    fn bot(id: u64) -> Member {
        Member {
            id: UserId(id),
            display_name: format!("bot{id}"),
            is_bot: true,
        }
    }

    fn event(chat_id: ChatId, members: Vec<Member>) -> MemberEvent {
        MemberEvent {
            chat_id,
            actor_user_id: ACTOR,
            group_name: "Rustaceans".to_string(),
            added_members: members,
        }
    }

    async fn run(
        api: &FakeApi,
        store: &FakeStore,
        permissions: &Permissions,
        event: &MemberEvent,
    ) -> anyhow::Result<WelcomeOutcome> {
        let texts = WelcomeTexts::default();
        NewMemberWelcomeHandler::new(api, store, permissions, &texts)
            .handle(event)
            .await
    }

    #[test]
    fn test_event_from_service_message() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "message_id": 10,
            "date": 1_700_000_000,
            "chat": { "id": -42, "type": "group", "title": "Rustaceans" },
            "from": { "id": 500, "is_bot": false, "first_name": "Admin" },
            "new_chat_members": [
                { "id": 1, "is_bot": false, "first_name": "A & B" },
                { "id": 2, "is_bot": true, "first_name": "Spam", "username": "spam_bot" }
            ]
        }))
        .unwrap();

        let event = MemberEvent::from_message(&msg, "Fallback").unwrap();
        assert_eq!(event.chat_id, ChatId(-42));
        assert_eq!(event.actor_user_id, ACTOR);
        assert_eq!(event.group_name, "Rustaceans");
        assert_eq!(
            event.added_members,
            vec![user(1, "A & B"), {
                let mut b = bot(2);
                b.display_name = "Spam".into();
                b
            }]
        );
    }

    #[test]
    fn test_plain_message_is_not_an_event() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "message_id": 11,
            "date": 1_700_000_000,
            "chat": { "id": -42, "type": "group", "title": "Rustaceans" },
            "from": { "id": 500, "is_bot": false, "first_name": "Admin" },
            "text": "hello"
        }))
        .unwrap();

        assert!(MemberEvent::from_message(&msg, "Fallback").is_none());
    }

    #[test]
    fn test_partition_keeps_order() {
        let members = vec![user(1, "a"), bot(2), user(3, "b"), bot(4)];
        let (users, bots) = partition_members(&members);

        let user_ids: Vec<_> = users.iter().map(|m| m.id.0).collect();
        let bot_ids: Vec<_> = bots.iter().map(|m| m.id.0).collect();
        assert_eq!(user_ids, vec![1, 3]);
        assert_eq!(bot_ids, vec![2, 4]);

        let (users, bots) = partition_members(&[]);
        assert!(users.is_empty() && bots.is_empty());
    }

    #[test]
    fn test_render_escapes_names() {
        let a = user(1, "A & B");
        let c = user(2, "<i>C</i>");
        let text = render_welcome_text(&[&a, &c], "<b>Group</b>", &WelcomeTexts::default());

        assert!(text.starts_with(
            "Welcome <a href=\"tg://user?id=1\">A &amp; B</a>, <a href=\"tg://user?id=2\">&lt;i&gt;C&lt;/i&gt;</a> to the"
        ));
        // group name is trusted
        assert!(text.contains("<b><b>Group</b></b> group\n"));
        assert!(text.contains("this is <b>NOT</b> the Telegram Support Chat."));
        assert!(text.ends_with(
            "Read the <a href=\"https://telegram.me/PHP_Telegram_Support_Bot?start=\">Rules</a> that apply here."
        ));
        assert_eq!(text.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_only_bots_yields_empty_outcome() {
        let api = FakeApi::with_status(MemberStatus::Administrator);
        let store = FakeStore::default();

        let outcome = run(&api, &store, &Permissions::default(), &event(CHAT, vec![bot(2), bot(3)]))
            .await
            .unwrap();

        assert_eq!(outcome, WelcomeOutcome::Empty);
        assert_eq!(api.count(|c| matches!(c, Call::Send(..))), 0);
        assert_eq!(*store.writes.lock(), 0);
    }

    #[tokio::test]
    async fn test_no_bots_skips_status_query() {
        let api = FakeApi::with_status(MemberStatus::Member);
        let store = FakeStore::default();

        run(&api, &store, &Permissions::default(), &event(CHAT, vec![user(1, "A")]))
            .await
            .unwrap();

        assert_eq!(api.count(|c| matches!(c, Call::Status(..))), 0);
        assert_eq!(api.count(|c| matches!(c, Call::Remove(..))), 0);
    }

    #[tokio::test]
    async fn test_unprivileged_actor_bots_removed_once_each() {
        let api = FakeApi::with_status(MemberStatus::Member);
        let store = FakeStore::default();

        run(&api, &store, &Permissions::default(), &event(CHAT, vec![bot(2), user(1, "A"), bot(3)]))
            .await
            .unwrap();

        let calls = api.calls();
        assert_eq!(
            calls.iter().filter(|c| matches!(c, Call::Status(..))).count(),
            1
        );
        assert!(calls.contains(&Call::Status(CHAT, ACTOR)));
        let removed: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::Remove(chat, user) => Some((*chat, user.0)),
                _ => None,
            })
            .collect();
        assert_eq!(removed, vec![(CHAT, 2), (CHAT, 3)]);
    }

    #[tokio::test]
    async fn test_privileged_actor_keeps_bots() {
        for status in [MemberStatus::Creator, MemberStatus::Administrator] {
            let api = FakeApi::with_status(status);
            let store = FakeStore::default();

            run(&api, &store, &Permissions::default(), &event(CHAT, vec![bot(2), bot(3)]))
                .await
                .unwrap();

            assert_eq!(api.count(|c| matches!(c, Call::Remove(..))), 0);
        }
    }

    #[tokio::test]
    async fn test_bot_owner_needs_no_status_query() {
        let api = FakeApi::with_status(MemberStatus::Member);
        let store = FakeStore::default();
        let permissions = Permissions::with_owners(vec![ACTOR.0]);

        run(&api, &store, &permissions, &event(CHAT, vec![bot(2)]))
            .await
            .unwrap();

        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_owner_list_does_not_cover_other_actors() {
        let api = FakeApi::with_status(MemberStatus::Member);
        let store = FakeStore::default();
        let permissions = Permissions::with_owners(vec![ACTOR.0 + 1]);

        run(&api, &store, &permissions, &event(CHAT, vec![bot(2)]))
            .await
            .unwrap();

        assert!(api.calls().contains(&Call::Status(CHAT, ACTOR)));
        assert!(api.calls().contains(&Call::Remove(CHAT, UserId(2))));
    }

    #[tokio::test]
    async fn test_failed_status_query_removes_bots() {
        let api = FakeApi::default();
        let store = FakeStore::default();

        run(&api, &store, &Permissions::default(), &event(CHAT, vec![bot(2)]))
            .await
            .unwrap();

        assert!(api.calls().contains(&Call::Remove(CHAT, UserId(2))));
    }

    #[tokio::test]
    async fn test_failed_removal_does_not_block_others() {
        let api = FakeApi {
            status: Some(MemberStatus::Member),
            fail_remove: vec![UserId(2)],
            ..Default::default()
        };
        let store = FakeStore::default();

        run(&api, &store, &Permissions::default(), &event(CHAT, vec![bot(2), bot(3), bot(4)]))
            .await
            .unwrap();

        assert_eq!(api.count(|c| matches!(c, Call::Remove(..))), 3);
    }

    #[tokio::test]
    async fn test_welcome_text_escapes_and_mentions() {
        let api = FakeApi::default();
        let store = FakeStore::default();

        run(&api, &store, &Permissions::default(), &event(CHAT, vec![user(1, "A & B")]))
            .await
            .unwrap();

        let sent: Vec<_> = api
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send(_, text) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("A &amp; B"));
        assert!(!sent[0].contains("A & B"));
        assert!(sent[0].contains("tg://user?id=1"));
        assert!(sent[0].contains("<b>Rustaceans</b>"));
    }

    #[tokio::test]
    async fn test_pointer_replaced_on_second_welcome() {
        let api = FakeApi::default().queue_ids(&[42, 99]);
        let store = FakeStore::default();
        let permissions = Permissions::default();

        let first = run(&api, &store, &permissions, &event(CHAT, vec![user(1, "A")]))
            .await
            .unwrap();
        assert_eq!(
            first,
            WelcomeOutcome::Sent(SentMessage {
                chat_id: CHAT,
                message_id: MessageId(42)
            })
        );
        assert_eq!(store.pointer(CHAT).as_deref(), Some("42"));
        assert_eq!(api.count(|c| matches!(c, Call::Delete(..))), 0);

        run(&api, &store, &permissions, &event(CHAT, vec![user(2, "B")]))
            .await
            .unwrap();

        let deletes: Vec<_> = api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Delete(..)))
            .collect();
        assert_eq!(deletes, vec![Call::Delete(CHAT, MessageId(42))]);
        assert_eq!(store.pointer(CHAT).as_deref(), Some("99"));
    }

    #[tokio::test]
    async fn test_failed_send_leaves_store_untouched() {
        let api = FakeApi {
            fail_send: true,
            ..Default::default()
        };
        let store = FakeStore::default();
        store.values.lock().insert(
            (CHAT.0, WELCOME_MESSAGE_OPTION.to_string()),
            "42".to_string(),
        );

        let outcome = run(&api, &store, &Permissions::default(), &event(CHAT, vec![user(1, "A")]))
            .await
            .unwrap();

        assert_eq!(outcome, WelcomeOutcome::Empty);
        assert_eq!(*store.writes.lock(), 0);
        assert_eq!(store.pointer(CHAT).as_deref(), Some("42"));
        assert_eq!(api.count(|c| matches!(c, Call::Delete(..))), 0);
    }

    #[tokio::test]
    async fn test_failed_delete_still_updates_pointer() {
        let api = FakeApi {
            fail_delete: true,
            ..Default::default()
        }
        .queue_ids(&[99]);
        let store = FakeStore::default();
        store.values.lock().insert(
            (CHAT.0, WELCOME_MESSAGE_OPTION.to_string()),
            "42".to_string(),
        );

        run(&api, &store, &Permissions::default(), &event(CHAT, vec![user(1, "A")]))
            .await
            .unwrap();

        assert_eq!(api.count(|c| matches!(c, Call::Delete(..))), 1);
        assert_eq!(store.pointer(CHAT).as_deref(), Some("99"));
    }

    #[tokio::test]
    async fn test_pointers_are_chat_scoped() {
        let other = ChatId(8);
        let api = FakeApi::default().queue_ids(&[42, 43]);
        let store = FakeStore::default();
        let permissions = Permissions::default();

        run(&api, &store, &permissions, &event(CHAT, vec![user(1, "A")]))
            .await
            .unwrap();
        run(&api, &store, &permissions, &event(other, vec![user(2, "B")]))
            .await
            .unwrap();

        assert_eq!(api.count(|c| matches!(c, Call::Delete(..))), 0);
        assert_eq!(store.pointer(CHAT).as_deref(), Some("42"));
        assert_eq!(store.pointer(other).as_deref(), Some("43"));
    }

    #[tokio::test]
    async fn test_malformed_pointer_is_overwritten() {
        let api = FakeApi::default().queue_ids(&[5]);
        let store = FakeStore::default();
        store.values.lock().insert(
            (CHAT.0, WELCOME_MESSAGE_OPTION.to_string()),
            "not-a-number".to_string(),
        );

        run(&api, &store, &Permissions::default(), &event(CHAT, vec![user(1, "A")]))
            .await
            .unwrap();

        assert_eq!(api.count(|c| matches!(c, Call::Delete(..))), 0);
        assert_eq!(store.pointer(CHAT).as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let api = FakeApi::default();
        let store = FakeStore {
            fail_get: true,
            ..Default::default()
        };

        let result = run(&api, &store, &Permissions::default(), &event(CHAT, vec![user(1, "A")])).await;

        assert!(result.is_err());
        assert_eq!(*store.writes.lock(), 0);
    }

    #[tokio::test]
    async fn test_zero_message_id_skips_pointer() {
        let api = FakeApi::default().queue_ids(&[0]);
        let store = FakeStore::default();

        let outcome = run(&api, &store, &Permissions::default(), &event(CHAT, vec![user(1, "A")]))
            .await
            .unwrap();

        assert!(matches!(outcome, WelcomeOutcome::Sent(_)));
        assert_eq!(*store.writes.lock(), 0);
    }
}
