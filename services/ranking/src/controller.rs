use crate::auth::{Action, Authorizer, PermissionError};
use crate::counter::UserId;
use crate::platform::ChatId;
use crate::store::StoreError;
use crate::tracker::{MergeSummary, Tracker};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

/// Errors from privileged ranking mutations
#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Authorized entry point for folding and wiping the history
pub struct MergeController {
    tracker: Arc<Tracker>,
    authorizer: Arc<Authorizer>,
}

impl MergeController {
    pub fn new(tracker: Arc<Tracker>, authorizer: Arc<Authorizer>) -> Self {
        Self {
            tracker,
            authorizer,
        }
    }

    /// Add the transient tally to the history and start a new round.
    ///
    /// Rejected requesters leave both tallies untouched.
    #[instrument(skip(self), fields(requester = %requester, chat = %chat))]
    pub async fn merge_and_reset(
        &self,
        requester: UserId,
        chat: ChatId,
    ) -> Result<MergeSummary, ControlError> {
        self.authorizer
            .authorize(requester, chat, Action::Merge)
            .await?;

        let summary = self.tracker.merge_into_durable()?;

        info!(requester = %requester, "Ranking reset after merge");

        Ok(summary)
    }

    /// Discard the history without merging the transient tally
    #[instrument(skip(self), fields(requester = %requester, chat = %chat))]
    pub async fn reset(&self, requester: UserId, chat: ChatId) -> Result<(), ControlError> {
        self.authorizer
            .authorize(requester, chat, Action::Wipe)
            .await?;

        self.tracker.wipe_durable()?;

        info!(requester = %requester, "Ranking history wiped");

        Ok(())
    }
}
