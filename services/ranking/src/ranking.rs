//! Ranking of participants by submission count.
//!
//! Ordering is a stable descending sort on the count, so users with equal
//! counts keep the order in which they appear in the tally. Display names
//! are resolved per user; a failed lookup falls back to a label carrying
//! the raw user id and never aborts the ranking.

use crate::counter::{CounterMap, UserId};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Human-readable name of a participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayName(String);

impl DisplayName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Join first and optional last name
    pub fn from_parts(first_name: &str, last_name: Option<&str>) -> Self {
        let full = format!("{} {}", first_name, last_name.unwrap_or(""));
        Self(full.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A display name could not be resolved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("name lookup for user {user} failed: {reason}")]
pub struct LookupError {
    pub user: UserId,
    pub reason: String,
}

/// Source of display names for ranked users
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, user: UserId) -> Result<DisplayName, LookupError>;
}

/// One line of a ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingEntry {
    pub user: UserId,
    pub name: String,
    pub count: u64,
}

/// Ordered participants plus everyone who has not submitted anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ranking {
    pub entries: Vec<RankingEntry>,
    pub non_participants: Vec<RankingEntry>,
}

/// Users ordered by count, highest first, ties in tally order
pub fn order(counter: &CounterMap) -> Vec<(UserId, u64)> {
    let mut ordered: Vec<(UserId, u64)> = counter.iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1));
    ordered
}

/// Users with a count of exactly zero, in tally order
pub fn non_participants(counter: &CounterMap) -> Vec<UserId> {
    counter
        .iter()
        .filter(|(_, count)| *count == 0)
        .map(|(user, _)| user)
        .collect()
}

/// Builds rankings and resolves the names shown in them
#[derive(Debug, Clone)]
pub struct RankingEngine {
    fallback_prefix: String,
}

impl RankingEngine {
    pub fn new(fallback_prefix: impl Into<String>) -> Self {
        Self {
            fallback_prefix: fallback_prefix.into(),
        }
    }

    /// Label used when a user's name cannot be resolved
    pub fn fallback_label(&self, user: UserId) -> String {
        format!("{} {}", self.fallback_prefix, user)
    }

    /// Rank `counter`, keeping the first `limit` entries when set.
    ///
    /// Zero-count users are always reported in `non_participants`, even
    /// when truncation drops them from `entries`.
    pub async fn rank(
        &self,
        counter: &CounterMap,
        resolver: &dyn NameResolver,
        limit: Option<usize>,
    ) -> Ranking {
        let mut ordered = order(counter);
        if let Some(limit) = limit {
            ordered.truncate(limit);
        }
        let idle = non_participants(counter);

        let mut names: HashMap<UserId, String> = HashMap::new();
        for user in ordered.iter().map(|(user, _)| *user).chain(idle.iter().copied()) {
            if names.contains_key(&user) {
                continue;
            }
            let name = match resolver.resolve(user).await {
                Ok(name) => name.to_string(),
                Err(e) => {
                    debug!(user = %user, error = %e, "Using fallback label");
                    metrics::counter!("tally.name_lookup.failed").increment(1);
                    self.fallback_label(user)
                }
            };
            names.insert(user, name);
        }

        let label = |user: UserId| {
            names
                .get(&user)
                .cloned()
                .unwrap_or_else(|| self.fallback_label(user))
        };

        Ranking {
            entries: ordered
                .iter()
                .map(|(user, count)| RankingEntry {
                    user: *user,
                    name: label(*user),
                    count: *count,
                })
                .collect(),
            non_participants: idle
                .iter()
                .map(|user| RankingEntry {
                    user: *user,
                    name: label(*user),
                    count: 0,
                })
                .collect(),
        }
    }
}

impl Default for RankingEngine {
    fn default() -> Self {
        Self::new("User")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const A: UserId = UserId(1);
    const B: UserId = UserId(2);
    const C: UserId = UserId(3);

    /// Resolves names from a fixed table and counts lookups
    struct TableResolver {
        names: HashMap<UserId, &'static str>,
        lookups: AtomicUsize,
    }

    impl TableResolver {
        fn new(names: &[(UserId, &'static str)]) -> Self {
            Self {
                names: names.iter().copied().collect(),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NameResolver for TableResolver {
        async fn resolve(&self, user: UserId) -> Result<DisplayName, LookupError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.names
                .get(&user)
                .map(|name| DisplayName::new(*name))
                .ok_or_else(|| LookupError {
                    user,
                    reason: "user not found".to_string(),
                })
        }
    }

    fn counters(entries: &[(UserId, u64)]) -> CounterMap {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_ties_keep_tally_order() {
        let ordered = order(&counters(&[(A, 5), (B, 5), (C, 2)]));
        assert_eq!(ordered, vec![(A, 5), (B, 5), (C, 2)]);

        let ordered = order(&counters(&[(C, 2), (B, 5), (A, 5)]));
        assert_eq!(ordered, vec![(B, 5), (A, 5), (C, 2)]);
    }

    #[test]
    fn test_order_is_repeatable() {
        let map = counters(&[(A, 1), (B, 3), (C, 1), (UserId(4), 3), (UserId(5), 0)]);
        let first = order(&map);
        for _ in 0..10 {
            assert_eq!(order(&map), first);
        }
    }

    #[tokio::test]
    async fn test_rank_scenario() {
        let mut map = CounterMap::new();
        map.add(A, 1);
        map.add(A, 1);
        map.add(B, 1);
        let resolver = TableResolver::new(&[(A, "Ana"), (B, "Bruno")]);

        let ranking = RankingEngine::default().rank(&map, &resolver, None).await;

        let pairs: Vec<(UserId, u64)> = ranking.entries.iter().map(|e| (e.user, e.count)).collect();
        assert_eq!(pairs, vec![(A, 2), (B, 1)]);
        assert_eq!(ranking.entries[0].name, "Ana");
        assert!(ranking.non_participants.is_empty());
    }

    #[tokio::test]
    async fn test_truncation_still_reports_all_idle_users() {
        let mut entries: Vec<(UserId, u64)> = (1..=6).map(|id| (UserId(id), 10 - id as u64)).collect();
        entries.push((UserId(20), 0));
        entries.push((UserId(21), 0));
        let map = counters(&entries);
        let resolver = TableResolver::new(&[]);

        let ranking = RankingEngine::default().rank(&map, &resolver, Some(5)).await;

        assert_eq!(ranking.entries.len(), 5);
        assert_eq!(ranking.entries[0].user, UserId(1));
        let idle: Vec<UserId> = ranking.non_participants.iter().map(|e| e.user).collect();
        assert_eq!(idle, vec![UserId(20), UserId(21)]);
    }

    #[tokio::test]
    async fn test_failed_lookup_uses_fallback() {
        let map = counters(&[(A, 3), (B, 2), (C, 0)]);
        let resolver = TableResolver::new(&[(A, "Ana"), (C, "Carla")]);

        let ranking = RankingEngine::new("Usuario").rank(&map, &resolver, None).await;

        let names: Vec<&str> = ranking.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Ana", "Usuario 2", "Carla"]);
        assert_eq!(ranking.non_participants[0].name, "Carla");
    }

    #[tokio::test]
    async fn test_each_user_is_resolved_once() {
        let map = counters(&[(A, 0), (B, 0)]);
        let resolver = TableResolver::new(&[(A, "Ana"), (B, "Bruno")]);

        let ranking = RankingEngine::default().rank(&map, &resolver, None).await;

        assert_eq!(ranking.entries.len(), 2);
        assert_eq!(ranking.non_participants.len(), 2);
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_tally() {
        let resolver = TableResolver::new(&[]);
        let ranking = RankingEngine::default()
            .rank(&CounterMap::new(), &resolver, Some(5))
            .await;
        assert_eq!(ranking, Ranking::default());
    }

    #[test]
    fn test_non_participants_in_tally_order() {
        let map = counters(&[(C, 0), (A, 4), (B, 0)]);
        let idle: HashSet<UserId> = non_participants(&map).into_iter().collect();
        assert_eq!(non_participants(&map), vec![C, B]);
        assert!(!idle.contains(&A));
    }

    #[test]
    fn test_display_name_from_parts() {
        assert_eq!(DisplayName::from_parts("Ana", Some("Lopez")).as_str(), "Ana Lopez");
        assert_eq!(DisplayName::from_parts("Ana", None).as_str(), "Ana");
        assert_eq!(DisplayName::from_parts("Ana", Some("")).as_str(), "Ana");
    }
}
