use crate::config::AuthConfig;
use crate::counter::UserId;
use crate::platform::{ChatId, ChatPlatform};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Who may run privileged commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthPolicy {
    /// Only the configured operator
    #[default]
    Operator,
    /// The operator or any current administrator of the chat
    OperatorOrAdmins,
}

/// Commands subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    QuickView,
    FullView,
    HistoricalView,
    Merge,
    Wipe,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::QuickView => "view the ranking",
            Action::FullView => "view the full ranking",
            Action::HistoricalView => "view the historical ranking",
            Action::Merge => "reset the ranking",
            Action::Wipe => "wipe the ranking history",
        };
        f.write_str(name)
    }
}

/// Requester is not allowed to run a command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("user {requester} is not allowed to {action}")]
pub struct PermissionError {
    pub requester: UserId,
    pub action: Action,
}

/// Decides whether a requester may run a command
pub struct Authorizer {
    operator: UserId,
    policy: AuthPolicy,
    public_quick_view: bool,
    platform: Arc<dyn ChatPlatform>,
}

impl Authorizer {
    pub fn new(config: &AuthConfig, platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            operator: UserId(config.operator_id),
            policy: config.policy,
            public_quick_view: config.public_quick_view,
            platform,
        }
    }

    pub fn operator(&self) -> UserId {
        self.operator
    }

    pub fn policy(&self) -> AuthPolicy {
        self.policy
    }

    /// Check `requester` against the configured policy for `action`
    pub async fn authorize(
        &self,
        requester: UserId,
        chat: ChatId,
        action: Action,
    ) -> Result<(), PermissionError> {
        if action == Action::QuickView && self.public_quick_view {
            return Ok(());
        }

        if requester == self.operator {
            return Ok(());
        }

        if self.policy == AuthPolicy::OperatorOrAdmins {
            match self.platform.administrators(chat).await {
                Ok(admins) if admins.contains(&requester) => {
                    debug!(requester = %requester, chat = %chat, "Requester is a chat administrator");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        chat = %chat,
                        error = %e,
                        "Could not fetch chat administrators, denying"
                    );
                }
            }
        }

        metrics::counter!("tally.permission.denied").increment(1);
        debug!(requester = %requester, action = %action, "Permission denied");

        Err(PermissionError { requester, action })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{MockChatPlatform, PlatformError};

    const OPERATOR: UserId = UserId(123456789);
    const ADMIN: UserId = UserId(555);
    const MEMBER: UserId = UserId(777);
    const CHAT: ChatId = ChatId(-1001);

    fn config(policy: AuthPolicy, public_quick_view: bool) -> AuthConfig {
        AuthConfig {
            operator_id: OPERATOR.get(),
            policy,
            public_quick_view,
        }
    }

    fn no_admin_lookups() -> Arc<dyn ChatPlatform> {
        let mut platform = MockChatPlatform::new();
        platform.expect_administrators().never();
        Arc::new(platform)
    }

    fn admins(list: Vec<UserId>) -> Arc<dyn ChatPlatform> {
        let mut platform = MockChatPlatform::new();
        platform
            .expect_administrators()
            .returning(move |_| Ok(list.clone()));
        Arc::new(platform)
    }

    #[tokio::test]
    async fn test_operator_policy() {
        let auth = Authorizer::new(&config(AuthPolicy::Operator, true), no_admin_lookups());

        assert!(auth.authorize(OPERATOR, CHAT, Action::Merge).await.is_ok());
        assert_eq!(
            auth.authorize(MEMBER, CHAT, Action::Merge).await,
            Err(PermissionError {
                requester: MEMBER,
                action: Action::Merge,
            })
        );
        assert!(auth.authorize(ADMIN, CHAT, Action::Wipe).await.is_err());
    }

    #[tokio::test]
    async fn test_admin_policy() {
        let auth = Authorizer::new(
            &config(AuthPolicy::OperatorOrAdmins, true),
            admins(vec![ADMIN]),
        );

        assert!(auth.authorize(ADMIN, CHAT, Action::FullView).await.is_ok());
        assert!(auth.authorize(OPERATOR, CHAT, Action::Merge).await.is_ok());
        assert!(auth.authorize(MEMBER, CHAT, Action::Merge).await.is_err());
    }

    #[tokio::test]
    async fn test_admin_lookup_failure_denies() {
        let mut platform = MockChatPlatform::new();
        platform
            .expect_administrators()
            .returning(|_| Err(PlatformError::Transport("connection reset".to_string())));
        let auth = Authorizer::new(&config(AuthPolicy::OperatorOrAdmins, true), Arc::new(platform));

        assert!(auth.authorize(ADMIN, CHAT, Action::Merge).await.is_err());
        assert!(auth.authorize(OPERATOR, CHAT, Action::Merge).await.is_ok());
    }

    #[tokio::test]
    async fn test_quick_view_visibility() {
        let public = Authorizer::new(&config(AuthPolicy::Operator, true), no_admin_lookups());
        assert!(public.authorize(MEMBER, CHAT, Action::QuickView).await.is_ok());
        assert!(public.authorize(MEMBER, CHAT, Action::FullView).await.is_err());

        let private = Authorizer::new(&config(AuthPolicy::Operator, false), no_admin_lookups());
        assert!(private.authorize(MEMBER, CHAT, Action::QuickView).await.is_err());
        assert!(private.authorize(OPERATOR, CHAT, Action::QuickView).await.is_ok());
    }
}
