//! Boundary between the participation core and the chat platform.
//!
//! The bot only sees the platform through [`ChatPlatform`], which keeps the
//! dispatch logic testable without network access.

use crate::counter::UserId;
use crate::ranking::{DisplayName, LookupError, NameResolver};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Platform identifier of a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors talking to the chat platform
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("platform API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("unexpected platform response: {0}")]
    Decode(String),
}

/// A chat message as seen by the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Chat the message was posted in
    pub chat: ChatId,
    /// Message id, used for replies
    pub message_id: i64,
    /// Author, absent for anonymous channel posts
    pub sender: Option<UserId>,
    /// Text or caption
    pub text: Option<String>,
    /// Message carries a photo or a video
    pub has_media: bool,
}

/// Messages fetched by one poll
#[derive(Debug, Clone, Default)]
pub struct UpdateBatch {
    /// Offset to pass to the next poll, if any update was received
    pub next_offset: Option<i64>,
    pub messages: Vec<IncomingMessage>,
}

/// Operations the bot needs from the chat platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Long-poll for new messages starting at `offset`
    async fn poll(&self, offset: Option<i64>, timeout: Duration)
        -> Result<UpdateBatch, PlatformError>;

    /// Post `text` to `chat`, optionally as a reply to `reply_to`
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), PlatformError>;

    /// Display name of `user` as a member of `chat`
    async fn member_name(&self, chat: ChatId, user: UserId) -> Result<DisplayName, PlatformError>;

    /// Current administrators of `chat`
    async fn administrators(&self, chat: ChatId) -> Result<Vec<UserId>, PlatformError>;
}

/// Resolves ranking names through chat membership lookups
pub struct MemberNameResolver<'a> {
    platform: &'a dyn ChatPlatform,
    chat: ChatId,
}

impl<'a> MemberNameResolver<'a> {
    pub fn new(platform: &'a dyn ChatPlatform, chat: ChatId) -> Self {
        Self { platform, chat }
    }
}

#[async_trait]
impl NameResolver for MemberNameResolver<'_> {
    async fn resolve(&self, user: UserId) -> Result<DisplayName, LookupError> {
        self.platform
            .member_name(self.chat, user)
            .await
            .map_err(|e| LookupError {
                user,
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_member_lookup_failure_becomes_lookup_error() {
        let mut platform = MockChatPlatform::new();
        platform
            .expect_member_name()
            .with(eq(ChatId(-100)), eq(UserId(9)))
            .returning(|_, _| {
                Err(PlatformError::Api {
                    code: 400,
                    description: "Bad Request: user not found".to_string(),
                })
            });

        let resolver = MemberNameResolver::new(&platform, ChatId(-100));
        let err = resolver.resolve(UserId(9)).await.unwrap_err();

        assert_eq!(err.user, UserId(9));
        assert!(err.reason.contains("user not found"));
    }

    #[tokio::test]
    async fn test_member_lookup_success() {
        let mut platform = MockChatPlatform::new();
        platform
            .expect_member_name()
            .returning(|_, _| Ok(DisplayName::new("Ana Lopez")));

        let resolver = MemberNameResolver::new(&platform, ChatId(1));
        assert_eq!(
            resolver.resolve(UserId(1)).await.unwrap().as_str(),
            "Ana Lopez"
        );
    }
}
