// Subscription registry: which accounts are watched, and where they go.
//
// The forward index (account → destinations) is what gets persisted and what
// the feed connection follows. The reverse index (channel → accounts) is
// derived from it, rebuilt on load, and updated in the same call as every
// forward mutation so the two never disagree.
//
// Ownership: the registry lives on the daemon task alongside the dispatch
// loop and the operator command handlers, and is only ever touched through
// `&mut self` there. It has no internal locking. Sharing it with another
// thread means wrapping it in a lock first.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{AccountId, ChannelId};

/// Result of a `watch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOutcome {
    /// The account was not followed anywhere before; the feed must be
    /// rebuilt to include it.
    pub new_account: bool,
    /// The (account, channel) pair already existed; nothing changed.
    pub already_watched: bool,
}

/// Result of a successful `unwatch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwatchOutcome {
    /// The last destination was removed, so the account is no longer
    /// followed and the feed must be rebuilt without it.
    pub account_removed: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("account {account} is not watched in channel {channel}")]
    NotWatched {
        account: AccountId,
        channel: ChannelId,
    },
}

/// Persisted form: only the forward index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrySnapshot(pub BTreeMap<AccountId, Vec<ChannelId>>);

#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    destinations: BTreeMap<AccountId, Vec<ChannelId>>,
    watched: HashMap<ChannelId, BTreeSet<AccountId>>,
    dirty: bool,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from its persisted form, rebuilding the reverse index.
    ///
    /// Empty destination lists and duplicate destinations in the snapshot are
    /// dropped so the in-memory invariants hold regardless of what was on disk.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let mut registry = Self::new();
        for (account, channels) in snapshot.0 {
            for channel in channels {
                registry.insert(&account, &channel);
            }
        }
        registry.dirty = false;
        registry
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot(self.destinations.clone())
    }

    /// Watch `account` in `channel`. Idempotent.
    pub fn watch(&mut self, account: &str, channel: &str) -> WatchOutcome {
        let new_account = !self.destinations.contains_key(account);
        let already_watched = !self.insert(account, channel);
        WatchOutcome {
            new_account,
            already_watched,
        }
    }

    /// Stop watching `account` in `channel`.
    ///
    /// Fails without touching anything if the pair is not watched.
    pub fn unwatch(&mut self, account: &str, channel: &str) -> Result<UnwatchOutcome, RegistryError> {
        let not_watched = || RegistryError::NotWatched {
            account: account.to_string(),
            channel: channel.to_string(),
        };

        let channels = self.destinations.get_mut(account).ok_or_else(not_watched)?;
        let position = channels
            .iter()
            .position(|c| c == channel)
            .ok_or_else(not_watched)?;
        channels.remove(position);

        let account_removed = channels.is_empty();
        if account_removed {
            self.destinations.remove(account);
        }

        if let Some(accounts) = self.watched.get_mut(channel) {
            accounts.remove(account);
            if accounts.is_empty() {
                self.watched.remove(channel);
            }
        }

        self.dirty = true;
        Ok(UnwatchOutcome { account_removed })
    }

    /// Channels that receive posts from `account`, in the order they were added.
    pub fn destinations_for(&self, account: &str) -> &[ChannelId] {
        self.destinations
            .get(account)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Accounts watched in `channel` (the channel's watch list).
    pub fn watched_in(&self, channel: &str) -> Option<&BTreeSet<AccountId>> {
        self.watched.get(channel)
    }

    pub fn is_watched_in(&self, account: &str, channel: &str) -> bool {
        self.watched
            .get(channel)
            .is_some_and(|accounts| accounts.contains(account))
    }

    /// Every followed account, used as the feed connection's filter.
    pub fn accounts(&self) -> Vec<AccountId> {
        self.destinations.keys().cloned().collect()
    }

    pub fn account_count(&self) -> usize {
        self.destinations.len()
    }

    pub fn channel_count(&self) -> usize {
        self.watched.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Reverse index recomputed from the forward index. Used to check the
    /// incrementally maintained one.
    pub fn derived_reverse_index(&self) -> HashMap<ChannelId, BTreeSet<AccountId>> {
        let mut reverse: HashMap<ChannelId, BTreeSet<AccountId>> = HashMap::new();
        for (account, channels) in &self.destinations {
            for channel in channels {
                reverse
                    .entry(channel.clone())
                    .or_default()
                    .insert(account.clone());
            }
        }
        reverse
    }

    /// The incrementally maintained reverse index.
    pub fn reverse_index(&self) -> &HashMap<ChannelId, BTreeSet<AccountId>> {
        &self.watched
    }

    // Returns false if the pair was already present.
    fn insert(&mut self, account: &str, channel: &str) -> bool {
        let channels = self.destinations.entry(account.to_string()).or_default();
        if channels.iter().any(|c| c == channel) {
            return false;
        }
        channels.push(channel.to_string());
        self.watched
            .entry(channel.to_string())
            .or_default()
            .insert(account.to_string());
        self.dirty = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_new_account() {
        let mut registry = SubscriptionRegistry::new();
        let outcome = registry.watch("A123", "chan1");
        assert!(outcome.new_account);
        assert!(!outcome.already_watched);
        assert_eq!(registry.destinations_for("A123"), ["chan1".to_string()]);
        assert!(registry.is_watched_in("A123", "chan1"));
        assert!(registry.is_dirty());
    }

    #[test]
    fn test_watch_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        registry.watch("A123", "chan1");
        registry.mark_clean();

        let outcome = registry.watch("A123", "chan1");
        assert!(!outcome.new_account);
        assert!(outcome.already_watched);
        assert_eq!(registry.destinations_for("A123").len(), 1);
        assert!(!registry.is_dirty());
    }

    #[test]
    fn test_watch_existing_account_in_second_channel() {
        let mut registry = SubscriptionRegistry::new();
        registry.watch("A123", "chan1");
        let outcome = registry.watch("A123", "chan2");
        assert!(!outcome.new_account);
        assert!(!outcome.already_watched);
        assert_eq!(
            registry.destinations_for("A123"),
            ["chan1".to_string(), "chan2".to_string()]
        );
    }

    #[test]
    fn test_unwatch_last_destination_removes_account() {
        let mut registry = SubscriptionRegistry::new();
        registry.watch("A123", "chan1");
        let outcome = registry.unwatch("A123", "chan1").unwrap();
        assert!(outcome.account_removed);
        assert!(registry.accounts().is_empty());
        assert!(registry.watched_in("chan1").is_none());
    }

    #[test]
    fn test_unwatch_one_of_two_destinations_keeps_account() {
        let mut registry = SubscriptionRegistry::new();
        registry.watch("A123", "chan1");
        registry.watch("A123", "chan2");
        let outcome = registry.unwatch("A123", "chan1").unwrap();
        assert!(!outcome.account_removed);
        assert_eq!(registry.destinations_for("A123"), ["chan2".to_string()]);
    }

    #[test]
    fn test_unwatch_not_watched_is_an_error_and_changes_nothing() {
        let mut registry = SubscriptionRegistry::new();
        registry.watch("A123", "chan1");
        registry.mark_clean();

        let err = registry.unwatch("A123", "chan2").unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotWatched {
                account: "A123".into(),
                channel: "chan2".into()
            }
        );
        assert!(registry.unwatch("B456", "chan1").is_err());
        assert!(!registry.is_dirty());
        assert_eq!(registry.destinations_for("A123"), ["chan1".to_string()]);
    }

    #[test]
    fn test_destinations_for_unknown_account_is_empty() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.destinations_for("nobody").is_empty());
    }

    #[test]
    fn test_snapshot_roundtrip_rebuilds_reverse_index() {
        let mut registry = SubscriptionRegistry::new();
        registry.watch("A123", "chan1");
        registry.watch("B456", "chan1");
        registry.watch("B456", "chan2");

        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        let restored = SubscriptionRegistry::from_snapshot(serde_json::from_str(&json).unwrap());

        assert!(!restored.is_dirty());
        assert_eq!(restored.accounts(), vec!["A123", "B456"]);
        assert_eq!(restored.reverse_index(), &restored.derived_reverse_index());
        assert_eq!(restored.watched_in("chan1").unwrap().len(), 2);
    }

    #[test]
    fn test_from_snapshot_drops_empty_and_duplicate_destinations() {
        let json = r#"{"A123": [], "B456": ["chan1", "chan1", "chan2"]}"#;
        let registry = SubscriptionRegistry::from_snapshot(serde_json::from_str(json).unwrap());
        assert_eq!(registry.accounts(), vec!["B456"]);
        assert_eq!(
            registry.destinations_for("B456"),
            ["chan1".to_string(), "chan2".to_string()]
        );
    }

    #[test]
    fn test_snapshot_serializes_as_plain_map() {
        let mut registry = SubscriptionRegistry::new();
        registry.watch("A123", "chan1");
        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        assert_eq!(json, r#"{"A123":["chan1"]}"#);
    }
}
