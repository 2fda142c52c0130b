//! Tally Ranking Service
//!
//! Participation tracker for group chats. Every photo or video a member
//! sends counts as one submission. Submissions accumulate in an in-memory
//! tally for the current round; an authorized command folds that round into
//! a durable, file-backed history and starts a new one.
//!
//! ## Features
//!
//! - **Participation Recording**: photos and videos are counted per user,
//!   other messages register the sender with a zero count
//! - **Deterministic Rankings**: stable descending order, ties keep the
//!   order in which users first appeared, zero-count users listed apart
//! - **Additive Merge**: the round is added to the history and cleared under
//!   one lock, so no submission is lost or counted twice
//! - **Atomic Persistence**: the history is a JSON object replaced through a
//!   temporary file on every save
//! - **Read-only API**: current and historical rankings over HTTP
//!
//! ## Architecture
//!
//! ```text
//! Chat Platform              Tracker                    participation_data.json
//! ┌──────────────┐          ┌──────────────┐           ┌──────────────┐
//! │ Telegram     │          │ Transient    │  merge    │ Durable      │
//! │ getUpdates   │─────────▶│ Counter      │──────────▶│ Store        │
//! └──────────────┘          └──────────────┘           └──────────────┘
//!        │                         ▲  │                        │
//!        ▼                         │  ▼                        ▼
//! ┌──────────────┐  record  ┌──────────────┐           ┌──────────────┐
//! │ Bot          │─────────▶│ Ranking      │◀──────────│ Merge        │
//! │ Dispatch     │◀─────────│ Engine       │           │ Controller   │
//! └──────────────┘  render  └──────────────┘           └──────────────┘
//!                                  │
//!                                  ▼
//!                           ┌──────────────┐
//!                           │ Ranking      │
//!                           │ HTTP API     │
//!                           └──────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod bot;
pub mod config;
pub mod controller;
pub mod counter;
pub mod platform;
pub mod ranking;
pub mod recorder;
pub mod store;
pub mod telegram;
pub mod tracker;

pub use api::AppState;
pub use auth::{Action, AuthPolicy, Authorizer, PermissionError};
pub use bot::{Bot, Command};
pub use config::Config;
pub use controller::{ControlError, MergeController};
pub use counter::{CounterMap, TransientCounter, UserId};
pub use platform::{ChatId, ChatPlatform, IncomingMessage, PlatformError, UpdateBatch};
pub use ranking::{DisplayName, LookupError, NameResolver, Ranking, RankingEngine, RankingEntry};
pub use recorder::Submission;
pub use store::{DurableStore, JsonFileStore, MemoryStore, StoreError};
pub use telegram::TelegramClient;
pub use tracker::{MergeSummary, Tracker};
