//! Minimal Telegram Bot API client.
//!
//! Only the four methods the bot needs are implemented: long polling for
//! updates, sending messages, and the two member lookups used for display
//! names and administrator checks.

use crate::config::TelegramConfig;
use crate::counter::UserId;
use crate::platform::{ChatId, ChatPlatform, IncomingMessage, PlatformError, UpdateBatch};
use crate::ranking::DisplayName;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Slack on top of the long-poll timeout before the HTTP request gives up
const POLL_GRACE: Duration = Duration::from_secs(10);

/// Timeout for every request other than long polling
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
    caption: Option<String>,
    #[serde(default)]
    photo: Vec<serde_json::Value>,
    video: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    first_name: String,
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    user: User,
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct GetChatMember {
    chat_id: i64,
    user_id: i64,
}

#[derive(Debug, Serialize)]
struct GetChatAdministrators {
    chat_id: i64,
}

impl Message {
    /// Bot senders are dropped so other bots never enter the tally
    fn into_incoming(self) -> IncomingMessage {
        let has_media = !self.photo.is_empty() || self.video.is_some();
        IncomingMessage {
            chat: ChatId(self.chat.id),
            message_id: self.message_id,
            sender: self
                .from
                .filter(|user| !user.is_bot)
                .map(|user| UserId(user.id)),
            text: self.text.or(self.caption),
            has_media,
        }
    }
}

/// Telegram Bot API client
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .build()
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.token
            ),
        })
    }

    async fn call<P, T>(&self, method: &str, payload: &P, timeout: Duration) -> Result<T, PlatformError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            // reqwest errors carry the URL, which contains the token
            .map_err(|e| PlatformError::Transport(e.without_url().to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| PlatformError::Transport(e.without_url().to_string()))?;

        let envelope: ApiResponse<T> = serde_json::from_str(&body)
            .map_err(|e| PlatformError::Decode(format!("{}: {}", method, e)))?;

        if !envelope.ok {
            return Err(PlatformError::Api {
                code: envelope.error_code.unwrap_or(0),
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }

        envelope
            .result
            .ok_or_else(|| PlatformError::Decode(format!("{}: missing result", method)))
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    #[instrument(skip(self))]
    async fn poll(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<UpdateBatch, PlatformError> {
        let request = GetUpdates {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: &["message"],
        };
        let updates: Vec<Update> = self
            .call("getUpdates", &request, timeout + POLL_GRACE)
            .await?;

        let next_offset = updates.iter().map(|u| u.update_id + 1).max();
        let messages: Vec<IncomingMessage> = updates
            .into_iter()
            .filter_map(|update| update.message)
            .map(Message::into_incoming)
            .collect();

        if !messages.is_empty() {
            debug!(count = messages.len(), "Received messages");
        }

        Ok(UpdateBatch {
            next_offset,
            messages,
        })
    }

    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), PlatformError> {
        let request = SendMessage {
            chat_id: chat.0,
            text,
            reply_to_message_id: reply_to,
        };
        let _: serde_json::Value = self.call("sendMessage", &request, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    async fn member_name(&self, chat: ChatId, user: UserId) -> Result<DisplayName, PlatformError> {
        let request = GetChatMember {
            chat_id: chat.0,
            user_id: user.get(),
        };
        let member: ChatMember = self
            .call("getChatMember", &request, REQUEST_TIMEOUT)
            .await?;
        Ok(DisplayName::from_parts(
            &member.user.first_name,
            member.user.last_name.as_deref(),
        ))
    }

    async fn administrators(&self, chat: ChatId) -> Result<Vec<UserId>, PlatformError> {
        let request = GetChatAdministrators { chat_id: chat.0 };
        let members: Vec<ChatMember> = self
            .call("getChatAdministrators", &request, REQUEST_TIMEOUT)
            .await?;
        Ok(members.into_iter().map(|m| UserId(m.user.id)).collect())
    }
}
