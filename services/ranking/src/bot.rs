//! Command dispatch for the chat bot.
//!
//! Messages are handled one at a time in arrival order. Photos and videos
//! count as submissions, any other message only registers its sender, and
//! slash commands are routed to the ranking views or to the controller.

use crate::auth::{Action, Authorizer};
use crate::config::RankingConfig;
use crate::controller::{ControlError, MergeController};
use crate::counter::{CounterMap, UserId};
use crate::platform::{ChatId, ChatPlatform, IncomingMessage, MemberNameResolver, PlatformError};
use crate::ranking::{Ranking, RankingEngine};
use crate::tracker::{MergeSummary, Tracker};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const GREETING: &str =
    "Hi! I keep the participation ranking of this chat. Send photos or videos to take part.";
const ACKNOWLEDGMENT: &str = "File received! It counts as participation 🫲.";
const DENIED: &str = "You are not allowed to run this command.";
const STORAGE_FAILURE: &str = "The ranking history could not be updated, please try again later.";
const HISTORY_UNAVAILABLE: &str = "The ranking history could not be read, please try again later.";
const WIPED: &str = "The ranking history has been wiped.";

/// Commands understood by the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    /// Top-N of the current round
    Ranking,
    /// Full history, posted as a new message
    SendRanking,
    /// Full history, as a reply
    HistoricalRanking,
    /// Full current round
    CurrentRanking,
    /// Merge the current round into the history
    ResetRanking,
    /// Discard the history
    WipeHistory,
}

impl Command {
    /// Parse `/command` or `/command@botname` at the start of `text`.
    ///
    /// With `own_username` set, commands addressed to another bot are
    /// rejected. Without it every `@botname` suffix is accepted.
    pub fn parse(text: &str, own_username: Option<&str>) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let word = word.strip_prefix('/')?;
        let (name, addressee) = match word.split_once('@') {
            Some((name, addressee)) => (name, Some(addressee)),
            None => (word, None),
        };

        if let (Some(addressee), Some(own)) = (addressee, own_username) {
            // Usernames are case-insensitive
            if !addressee.eq_ignore_ascii_case(own.trim_start_matches('@')) {
                return None;
            }
        }

        match name {
            "start" => Some(Command::Start),
            "ranking" => Some(Command::Ranking),
            "send_ranking" => Some(Command::SendRanking),
            "historical_ranking" => Some(Command::HistoricalRanking),
            "current_ranking" => Some(Command::CurrentRanking),
            "reset_ranking" => Some(Command::ResetRanking),
            "wipe_history" => Some(Command::WipeHistory),
            _ => None,
        }
    }
}

/// Which tally a ranking is rendered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Top(usize),
    Current,
    Full,
    Historical,
}

impl View {
    fn title(&self) -> String {
        match self {
            View::Top(n) => format!("🏆 Top {} participation:", n),
            View::Current => "📈 Current round participation:".to_string(),
            View::Full => "📊 Full participation ranking 📊:".to_string(),
            View::Historical => "📚 Historical participation ranking:".to_string(),
        }
    }

    fn limit(&self) -> Option<usize> {
        match self {
            View::Top(n) => Some(*n),
            _ => None,
        }
    }
}

/// Render a ranking as a chat message
pub fn render(view: View, ranking: &Ranking) -> String {
    let mut text = view.title();
    text.push('\n');
    if ranking.entries.is_empty() {
        text.push_str("No submissions yet.\n");
    }
    for (position, entry) in ranking.entries.iter().enumerate() {
        text.push_str(&format!(
            "{}. {}: {} files sent\n",
            position + 1,
            entry.name,
            entry.count
        ));
    }

    text.push_str("\n🙃 Did not send anything:\n");
    if ranking.non_participants.is_empty() {
        text.push_str("Everyone took part!\n");
    }
    for entry in &ranking.non_participants {
        text.push_str(&entry.name);
        text.push('\n');
    }

    text
}

fn render_merge(summary: &MergeSummary) -> String {
    format!(
        "The ranking has been reset. {} submissions from {} participants were added to the history.",
        summary.submissions_merged, summary.users_merged
    )
}

/// Routes chat messages to the participation core
pub struct Bot {
    platform: Arc<dyn ChatPlatform>,
    tracker: Arc<Tracker>,
    authorizer: Arc<Authorizer>,
    controller: MergeController,
    engine: RankingEngine,
    top_n: usize,
    username: Option<String>,
}

impl Bot {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        tracker: Arc<Tracker>,
        authorizer: Arc<Authorizer>,
        config: &RankingConfig,
    ) -> Self {
        let controller = MergeController::new(tracker.clone(), authorizer.clone());
        Self {
            platform,
            tracker,
            authorizer,
            controller,
            engine: RankingEngine::new(config.fallback_label.clone()),
            top_n: config.top_n,
            username: None,
        }
    }

    /// Only answer `/command@name` mentions addressed to `username`
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Poll for messages and handle them until `cancel` fires
    pub async fn run(
        &self,
        poll_timeout: Duration,
        retry_backoff: Duration,
        cancel: CancellationToken,
    ) {
        let mut offset: Option<i64> = None;

        info!("Starting update polling loop");

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Received shutdown signal");
                    break;
                }
                batch = self.platform.poll(offset, poll_timeout) => batch,
            };

            match batch {
                Ok(batch) => {
                    if batch.next_offset.is_some() {
                        offset = batch.next_offset;
                    }
                    for message in batch.messages {
                        if let Err(e) = self.handle(&message).await {
                            warn!(
                                chat = %message.chat,
                                message_id = message.message_id,
                                error = %e,
                                "Failed to answer message"
                            );
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Polling failed");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(retry_backoff) => {}
                    }
                }
            }
        }

        info!("Update polling loop stopped");
    }

    /// Handle a single message
    #[instrument(skip(self, message), fields(chat = %message.chat, message_id = message.message_id))]
    pub async fn handle(&self, message: &IncomingMessage) -> Result<(), PlatformError> {
        let Some(sender) = message.sender else {
            debug!("Ignoring message without sender");
            return Ok(());
        };

        // Media always counts, even when its caption looks like a command
        let command = message
            .text
            .as_deref()
            .filter(|_| !message.has_media)
            .and_then(|text| Command::parse(text, self.username.as_deref()));
        if let Some(command) = command {
            return self.handle_command(command, sender, message).await;
        }

        let submission = self.tracker.record_submission(sender, message.has_media);
        if submission.acknowledges() {
            self.reply(message, ACKNOWLEDGMENT).await?;
        }

        Ok(())
    }

    async fn handle_command(
        &self,
        command: Command,
        sender: UserId,
        message: &IncomingMessage,
    ) -> Result<(), PlatformError> {
        debug!(command = ?command, sender = %sender, "Handling command");
        let chat = message.chat;

        match command {
            Command::Start => self.reply(message, GREETING).await,
            Command::Ranking => {
                let view = View::Top(self.top_n);
                if !self.allowed(sender, chat, Action::QuickView).await {
                    return self.reply(message, DENIED).await;
                }
                let text = self.render_view(view, &self.tracker.transient_snapshot(), chat).await;
                self.reply(message, &text).await
            }
            Command::CurrentRanking => {
                if !self.allowed(sender, chat, Action::FullView).await {
                    return self.reply(message, DENIED).await;
                }
                let text = self
                    .render_view(View::Current, &self.tracker.transient_snapshot(), chat)
                    .await;
                self.reply(message, &text).await
            }
            Command::SendRanking | Command::HistoricalRanking => {
                let action = if command == Command::SendRanking {
                    Action::FullView
                } else {
                    Action::HistoricalView
                };
                if !self.allowed(sender, chat, action).await {
                    return self.reply(message, DENIED).await;
                }
                let history = match self.tracker.durable_snapshot() {
                    Ok(history) => history,
                    Err(e) => {
                        error!(error = %e, "Failed to read ranking history");
                        return self.reply(message, HISTORY_UNAVAILABLE).await;
                    }
                };
                if command == Command::SendRanking {
                    let text = self.render_view(View::Full, &history, chat).await;
                    self.platform.send_message(chat, &text, None).await
                } else {
                    let text = self.render_view(View::Historical, &history, chat).await;
                    self.reply(message, &text).await
                }
            }
            Command::ResetRanking => match self.controller.merge_and_reset(sender, chat).await {
                Ok(summary) => self.reply(message, &render_merge(&summary)).await,
                Err(e) => self.reply_control_error(message, e).await,
            },
            Command::WipeHistory => match self.controller.reset(sender, chat).await {
                Ok(()) => self.reply(message, WIPED).await,
                Err(e) => self.reply_control_error(message, e).await,
            },
        }
    }

    async fn allowed(&self, sender: UserId, chat: ChatId, action: Action) -> bool {
        self.authorizer.authorize(sender, chat, action).await.is_ok()
    }

    async fn render_view(&self, view: View, counters: &CounterMap, chat: ChatId) -> String {
        let resolver = MemberNameResolver::new(self.platform.as_ref(), chat);
        let ranking = self.engine.rank(counters, &resolver, view.limit()).await;
        render(view, &ranking)
    }

    async fn reply_control_error(
        &self,
        message: &IncomingMessage,
        error: ControlError,
    ) -> Result<(), PlatformError> {
        match error {
            ControlError::Permission(_) => self.reply(message, DENIED).await,
            ControlError::Storage(e) => {
                error!(error = %e, "Failed to update ranking history");
                self.reply(message, STORAGE_FAILURE).await
            }
        }
    }

    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<(), PlatformError> {
        self.platform
            .send_message(message.chat, text, Some(message.message_id))
            .await
    }
}
