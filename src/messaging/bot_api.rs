use super::{
    ChatId, InboundEvent, IncomingMessage, MessageId, MessagingClient, MessagingError,
    SentMessage, UserId,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    chat_member: Option<ChatMemberUpdated>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: MessageId,
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: ChatId,
}

#[derive(Debug, Deserialize)]
struct User {
    id: UserId,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    user: User,
}

#[derive(Debug, Deserialize)]
struct ChatMemberUpdated {
    new_chat_member: ChatMember,
}

#[derive(Debug, Deserialize)]
struct PostedMessage {
    message_id: MessageId,
    chat: Chat,
}

/// Messenger backed by the Telegram Bot HTTP API.
///
/// The Bot API cannot search a chat's history by sender, so the message
/// volume reported for a user is the number of their messages this client
/// has received since it started.
pub struct BotApiClient {
    http: Client,
    base: Url,
    poll_timeout: Duration,
    observed: Mutex<HashMap<(ChatId, UserId), u64>>,
}

impl BotApiClient {
    pub fn new(
        api_base_url: &str,
        token: &str,
        request_timeout: Duration,
        poll_timeout: Duration,
    ) -> Result<Self, MessagingError> {
        let base = Url::parse(&format!("{}/bot{}/", api_base_url.trim_end_matches('/'), token))
            .map_err(|e| MessagingError::Decode(format!("invalid API base URL: {e}")))?;

        // Long polling holds the request open for the whole poll timeout
        let http = Client::builder()
            .timeout(request_timeout + poll_timeout)
            .user_agent(concat!("chat-sentry/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base,
            poll_timeout,
            observed: Mutex::new(HashMap::new()),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, MessagingError> {
        let url = self
            .base
            .join(method)
            .map_err(|e| MessagingError::Decode(format!("bad method name {method}: {e}")))?;

        let body = self
            .http
            .post(url)
            .json(&params)
            .send()
            .await?
            .text()
            .await?;

        decode_response(method, &body)
    }

    // Updates stay raw so that one malformed entry cannot stall the batch
    async fn get_updates(&self, offset: i64) -> Result<Vec<Value>, MessagingError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": self.poll_timeout.as_secs(),
                "allowed_updates": ["message", "chat_member"],
            }),
        )
        .await
    }

    fn observe(&self, event: &InboundEvent) {
        if let InboundEvent::NewMessage(message) = event {
            let mut observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
            *observed.entry((message.chat, message.sender)).or_insert(0) += 1;
        }
    }

    /// Long-poll for updates and forward them until the receiver is dropped.
    pub fn spawn_poller(self: Arc<Self>, events: mpsc::Sender<InboundEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut offset = 0;
            loop {
                let raw = match self.get_updates(offset).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        log::warn!("Polling for updates failed: {e}");
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                };

                let (next_offset, batch) = decode_batch(offset, raw);
                offset = next_offset;
                for event in batch {
                    self.observe(&event);
                    if events.send(event).await.is_err() {
                        log::info!("Event consumer stopped, ending update polling");
                        return;
                    }
                }
            }
        })
    }
}

fn decode_response<T: DeserializeOwned>(method: &str, body: &str) -> Result<T, MessagingError> {
    let response: ApiResponse<T> = serde_json::from_str(body)
        .map_err(|e| MessagingError::Decode(format!("{method} response: {e}")))?;
    unwrap_response(method, response)
}

/// Turn a `getUpdates` batch into events and the offset that acknowledges
/// it. Updates that fail to decode are logged and acknowledged anyway.
fn decode_batch(mut offset: i64, raw: Vec<Value>) -> (i64, Vec<InboundEvent>) {
    let mut events = Vec::with_capacity(raw.len());
    for value in raw {
        let update_id = value.get("update_id").and_then(Value::as_i64);
        if let Some(id) = update_id {
            offset = offset.max(id + 1);
        }

        match serde_json::from_value::<Update>(value) {
            Ok(update) => events.push(into_event(update)),
            Err(e) => log::warn!("Skipping undecodable update {update_id:?}: {e}"),
        }
    }
    (offset, events)
}

fn unwrap_response<T>(method: &str, response: ApiResponse<T>) -> Result<T, MessagingError> {
    if !response.ok {
        return Err(MessagingError::Api {
            method: method.to_string(),
            description: response
                .description
                .unwrap_or_else(|| "no description".to_string()),
        });
    }
    response
        .result
        .ok_or_else(|| MessagingError::Decode(format!("{method} returned no result")))
}

fn into_event(update: Update) -> InboundEvent {
    if let Some(message) = update.message {
        let text = message.text.or(message.caption);
        return match (message.from, text) {
            (Some(from), Some(text)) => InboundEvent::NewMessage(IncomingMessage {
                chat: message.chat.id,
                id: message.message_id,
                sender: from.id,
                text,
            }),
            _ => InboundEvent::Other(format!("message {} without text", message.message_id)),
        };
    }

    if let Some(member) = update.chat_member {
        return InboundEvent::StatusChange {
            user: member.new_chat_member.user.id,
        };
    }

    InboundEvent::Other(format!("update {}", update.update_id))
}

#[async_trait]
impl MessagingClient for BotApiClient {
    async fn list_admins(&self, chat: ChatId) -> Result<HashSet<UserId>, MessagingError> {
        let members: Vec<ChatMember> = self
            .call("getChatAdministrators", json!({ "chat_id": chat }))
            .await?;
        Ok(members.into_iter().map(|m| m.user.id).collect())
    }

    async fn count_recent_messages(
        &self,
        chat: ChatId,
        sender: UserId,
    ) -> Result<u64, MessagingError> {
        let observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
        Ok(observed.get(&(chat, sender)).copied().unwrap_or(0))
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), MessagingError> {
        let _: bool = self
            .call(
                "deleteMessage",
                json!({ "chat_id": chat, "message_id": message }),
            )
            .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        silent: bool,
    ) -> Result<SentMessage, MessagingError> {
        let posted: PostedMessage = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat,
                    "text": text,
                    "disable_notification": silent,
                }),
            )
            .await?;
        Ok(SentMessage {
            chat: posted.chat.id,
            id: posted.message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_update(raw: &str) -> Update {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_text_message_becomes_new_message() {
        let update = parse_update(
            r#"{"update_id": 5, "message": {"message_id": 77, "chat": {"id": -100}, "from": {"id": 42}, "text": "это спам"}}"#,
        );

        assert_eq!(
            into_event(update),
            InboundEvent::NewMessage(IncomingMessage {
                chat: -100,
                id: 77,
                sender: 42,
                text: "это спам".to_string(),
            })
        );
    }

    #[test]
    fn test_caption_is_used_as_text() {
        let update = parse_update(
            r#"{"update_id": 6, "message": {"message_id": 78, "chat": {"id": -100}, "from": {"id": 42}, "caption": "фото"}}"#,
        );
        assert!(matches!(into_event(update), InboundEvent::NewMessage(m) if m.text == "фото"));
    }

    #[test]
    fn test_non_text_updates() {
        let sticker = parse_update(
            r#"{"update_id": 7, "message": {"message_id": 79, "chat": {"id": -100}, "from": {"id": 42}}}"#,
        );
        assert!(matches!(into_event(sticker), InboundEvent::Other(_)));

        let member = parse_update(
            r#"{"update_id": 8, "chat_member": {"new_chat_member": {"user": {"id": 9}, "status": "member"}}}"#,
        );
        assert_eq!(into_event(member), InboundEvent::StatusChange { user: 9 });

        let unknown = parse_update(r#"{"update_id": 9, "poll": {}}"#);
        assert_eq!(into_event(unknown), InboundEvent::Other("update 9".to_string()));
    }

    #[test]
    fn test_api_error_response() {
        let response: ApiResponse<bool> =
            serde_json::from_str(r#"{"ok": false, "description": "Bad Request: message can't be deleted"}"#)
                .unwrap();

        match unwrap_response("deleteMessage", response) {
            Err(MessagingError::Api { method, description }) => {
                assert_eq!(method, "deleteMessage");
                assert!(description.contains("can't be deleted"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_update_is_skipped_and_acknowledged() {
        let raw = vec![
            json!({"update_id": 10, "message": {"message_id": 1, "chat": {"id": -100}, "from": {"id": 42}, "text": "привет"}}),
            json!({"update_id": 11, "message": {"message_id": "broken"}}),
            json!({"no_id": true}),
        ];

        let (offset, events) = decode_batch(0, raw);

        assert_eq!(offset, 12);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], InboundEvent::NewMessage(m) if m.text == "привет"));
    }

    #[test]
    fn test_offset_never_moves_backwards() {
        let raw = vec![json!({"update_id": 3, "poll": {}})];

        let (offset, events) = decode_batch(20, raw);

        assert_eq!(offset, 20);
        assert_eq!(events, vec![InboundEvent::Other("update 3".to_string())]);
    }

    #[test]
    fn test_unreadable_response_is_a_decode_error() {
        let result: Result<Vec<Value>, _> = decode_response("getUpdates", "<html>502</html>");
        assert!(matches!(result, Err(MessagingError::Decode(_))));

        let updates: Vec<Value> =
            decode_response("getUpdates", r#"{"ok": true, "result": [{"update_id": 1}]}"#).unwrap();
        assert_eq!(updates.len(), 1);
    }

    #[tokio::test]
    async fn test_observed_messages_feed_volume() {
        let client = BotApiClient::new(
            "https://api.telegram.org/",
            "123:secret",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.base.as_str(), "https://api.telegram.org/bot123:secret/");

        let message = InboundEvent::NewMessage(IncomingMessage {
            chat: 1,
            id: 1,
            sender: 2,
            text: "hi".to_string(),
        });
        client.observe(&message);
        client.observe(&message);
        client.observe(&InboundEvent::StatusChange { user: 2 });

        assert_eq!(client.count_recent_messages(1, 2).await.unwrap(), 2);
        assert_eq!(client.count_recent_messages(1, 3).await.unwrap(), 0);
    }
}
