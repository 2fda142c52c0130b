use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Platform-assigned identifier of a chat participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UserId)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId(id)
    }
}

/// Insertion-ordered mapping of user to submission count
///
/// A user present with a count of zero has been seen but has not sent any
/// qualifying media yet, which is different from a user that is absent.
/// Iteration order is the order in which users were first inserted; the
/// ranking relies on it to break ties deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterMap {
    order: Vec<UserId>,
    counts: HashMap<UserId, u64>,
}

impl CounterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.counts.contains_key(&user)
    }

    /// Count for `user`, zero when the user was never seen
    pub fn get(&self, user: UserId) -> u64 {
        self.counts.get(&user).copied().unwrap_or(0)
    }

    /// Ensure `user` is present. Returns true if it was inserted.
    pub fn touch(&mut self, user: UserId) -> bool {
        if self.counts.contains_key(&user) {
            return false;
        }
        self.order.push(user);
        self.counts.insert(user, 0);
        true
    }

    /// Set the count for `user`, keeping its position if already present
    pub fn insert(&mut self, user: UserId, count: u64) {
        self.touch(user);
        self.counts.insert(user, count);
    }

    /// Add `amount` to the count of `user` and return the new count
    pub fn add(&mut self, user: UserId, amount: u64) -> u64 {
        self.touch(user);
        let count = self.counts.entry(user).or_insert(0);
        *count = count.saturating_add(amount);
        *count
    }

    /// Additively fold `other` into this map.
    ///
    /// Users already present keep their position; new users are appended
    /// in `other`'s order. Zero counts are carried over as registrations.
    pub fn merge_from(&mut self, other: &CounterMap) {
        for (user, count) in other.iter() {
            self.add(user, count);
        }
    }

    /// Sum of all counts
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (UserId, u64)> + '_ {
        self.order.iter().map(move |user| (*user, self.get(*user)))
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.counts.clear();
    }
}

impl FromIterator<(UserId, u64)> for CounterMap {
    fn from_iter<I: IntoIterator<Item = (UserId, u64)>>(iter: I) -> Self {
        let mut map = CounterMap::new();
        for (user, count) in iter {
            map.insert(user, count);
        }
        map
    }
}

/// Tally accumulated since the last merge
///
/// Lives for the lifetime of the process and starts empty. Reads never fail:
/// unseen users count as zero.
#[derive(Debug, Default)]
pub struct TransientCounter {
    counts: CounterMap,
}

impl TransientCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `user` with a zero count if it is not present yet
    pub fn touch(&mut self, user: UserId) -> bool {
        self.counts.touch(user)
    }

    /// Count one qualifying submission and return the user's new total
    pub fn increment(&mut self, user: UserId) -> u64 {
        self.counts.add(user, 1)
    }

    pub fn get(&self, user: UserId) -> u64 {
        self.counts.get(user)
    }

    /// Owned copy of the current tally
    pub fn snapshot(&self) -> CounterMap {
        self.counts.clone()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: UserId = UserId(1);
    const B: UserId = UserId(2);
    const C: UserId = UserId(3);

    #[test]
    fn test_increment_counts_every_call() {
        let mut counter = TransientCounter::new();
        let calls = [A, B, A, C, A, B];
        for user in calls {
            counter.increment(user);
        }

        let snapshot = counter.snapshot();
        assert_eq!(snapshot.get(A), 3);
        assert_eq!(snapshot.get(B), 2);
        assert_eq!(snapshot.get(C), 1);
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn test_touch_is_idempotent() {
        let mut counter = TransientCounter::new();
        assert!(counter.touch(A));
        assert!(!counter.touch(A));

        let snapshot = counter.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains(A));
        assert_eq!(snapshot.get(A), 0);
    }

    #[test]
    fn test_touch_does_not_reset_existing_count() {
        let mut counter = TransientCounter::new();
        counter.increment(A);
        counter.increment(A);
        counter.touch(A);
        assert_eq!(counter.get(A), 2);
    }

    #[test]
    fn test_unseen_user_reads_zero() {
        let counter = TransientCounter::new();
        assert_eq!(counter.get(UserId(42)), 0);
        assert!(!counter.snapshot().contains(UserId(42)));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut counter = TransientCounter::new();
        counter.increment(A);
        let snapshot = counter.snapshot();
        counter.increment(A);
        counter.clear();

        assert_eq!(snapshot.get(A), 1);
        assert!(counter.is_empty());
    }

    #[test]
    fn test_merge_is_additive() {
        let mut durable: CounterMap = [(A, 5)].into_iter().collect();
        let transient: CounterMap = [(A, 3), (B, 1)].into_iter().collect();

        durable.merge_from(&transient);

        let expected: CounterMap = [(A, 8), (B, 1)].into_iter().collect();
        assert_eq!(durable, expected);
    }

    #[test]
    fn test_merge_of_empty_changes_nothing() {
        let mut durable: CounterMap = [(A, 5), (B, 0)].into_iter().collect();
        let before = durable.clone();
        durable.merge_from(&CounterMap::new());
        assert_eq!(durable, before);
    }

    #[test]
    fn test_merge_keeps_zero_registrations() {
        let mut durable = CounterMap::new();
        let transient: CounterMap = [(C, 0)].into_iter().collect();
        durable.merge_from(&transient);
        assert!(durable.contains(C));
        assert_eq!(durable.get(C), 0);
    }

    #[test]
    fn test_iteration_follows_first_insertion() {
        let mut map = CounterMap::new();
        map.add(C, 1);
        map.add(A, 1);
        map.add(C, 4);
        map.touch(B);

        let order: Vec<UserId> = map.iter().map(|(user, _)| user).collect();
        assert_eq!(order, vec![C, A, B]);
        assert_eq!(map.total(), 6);
    }

    #[test]
    fn test_user_id_parse() {
        assert_eq!("123456789".parse::<UserId>().unwrap(), UserId(123456789));
        assert_eq!("-100".parse::<UserId>().unwrap(), UserId(-100));
        assert!("abc".parse::<UserId>().is_err());
    }
}
