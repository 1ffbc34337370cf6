// Post history: what we already published, keyed by canonical event id.
//
// An original post and every reshare of it share one canonical id, so one
// entry here is enough to turn a later reshare into an edit of the message
// we already sent. Each entry holds at most one copy per destination.
// Entries are never removed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::{AccountId, ChannelId, EventId, MessageId};

/// A published copy of a post in one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedCopy {
    pub destination: ChannelId,
    /// The first message of the preview (the one that gets edited).
    pub message_id: MessageId,
    /// Accounts whose reshares have already been added to this copy.
    #[serde(default)]
    pub reshared_by: Vec<AccountId>,
    /// Set while the copy is incomplete: the index of the first preview
    /// unit that has not been sent yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_at: Option<usize>,
}

impl PublishedCopy {
    pub fn is_complete(&self) -> bool {
        self.resume_at.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostHistory {
    entries: HashMap<EventId, Vec<PublishedCopy>>,
    #[serde(skip)]
    dirty: bool,
}

impl PostHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_entry(&self, canonical_id: &str) -> bool {
        self.entries.contains_key(canonical_id)
    }

    /// Every published copy of `canonical_id`.
    pub fn get_entries(&self, canonical_id: &str) -> &[PublishedCopy] {
        self.entries
            .get(canonical_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The copy of `canonical_id` published to `destination`, if any.
    pub fn entry_for(&self, canonical_id: &str, destination: &str) -> Option<&PublishedCopy> {
        self.get_entries(canonical_id)
            .iter()
            .find(|copy| copy.destination == destination)
    }

    /// Record that `canonical_id` was published to `destination`.
    ///
    /// Returns false (and records nothing) if a copy for that destination
    /// already exists; the original message id is never overwritten.
    pub fn record_publish(
        &mut self,
        canonical_id: &str,
        destination: &str,
        message_id: &str,
    ) -> bool {
        let copies = self.entries.entry(canonical_id.to_string()).or_default();
        if copies.iter().any(|copy| copy.destination == destination) {
            return false;
        }
        copies.push(PublishedCopy {
            destination: destination.to_string(),
            message_id: message_id.to_string(),
            reshared_by: Vec::new(),
            resume_at: None,
        });
        self.dirty = true;
        true
    }

    /// Mark the copy in `destination` as cut off before unit `resume_at`,
    /// or as complete with `None`.
    ///
    /// Returns false if there is no such copy.
    pub fn set_resume_at(
        &mut self,
        canonical_id: &str,
        destination: &str,
        resume_at: Option<usize>,
    ) -> bool {
        let Some(copy) = self.copy_mut(canonical_id, destination) else {
            return false;
        };
        if copy.resume_at != resume_at {
            copy.resume_at = resume_at;
            self.dirty = true;
        }
        true
    }

    /// Record that `account`'s reshare was added to the copy in `destination`.
    ///
    /// Returns false if there is no such copy or the account was already
    /// recorded for it.
    pub fn record_reshare(&mut self, canonical_id: &str, destination: &str, account: &str) -> bool {
        let Some(copy) = self.copy_mut(canonical_id, destination) else {
            return false;
        };
        if copy.reshared_by.iter().any(|a| a == account) {
            return false;
        }
        copy.reshared_by.push(account.to_string());
        self.dirty = true;
        true
    }

    /// Whether `account` already has a reshare line on the copy in `destination`.
    pub fn has_reshare(&self, canonical_id: &str, destination: &str, account: &str) -> bool {
        self.entry_for(canonical_id, destination)
            .is_some_and(|copy| copy.reshared_by.iter().any(|a| a == account))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Published copies across all posts and destinations.
    pub fn copy_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn copy_mut(&mut self, canonical_id: &str, destination: &str) -> Option<&mut PublishedCopy> {
        self.entries
            .get_mut(canonical_id)
            .and_then(|copies| copies.iter_mut().find(|c| c.destination == destination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_publish_creates_entry() {
        let mut history = PostHistory::new();
        assert!(!history.has_entry("100"));

        assert!(history.record_publish("100", "chan1", "m1"));
        assert!(history.has_entry("100"));
        assert!(history.is_dirty());
        assert_eq!(
            history.get_entries("100"),
            [PublishedCopy {
                destination: "chan1".into(),
                message_id: "m1".into(),
                reshared_by: vec![],
                resume_at: None,
            }]
        );
    }

    #[test]
    fn test_record_publish_never_overwrites_a_destination() {
        let mut history = PostHistory::new();
        history.record_publish("100", "chan1", "m1");
        assert!(!history.record_publish("100", "chan1", "m2"));
        assert_eq!(history.entry_for("100", "chan1").unwrap().message_id, "m1");
        assert_eq!(history.get_entries("100").len(), 1);
    }

    #[test]
    fn test_record_publish_appends_other_destinations() {
        let mut history = PostHistory::new();
        history.record_publish("100", "chan1", "m1");
        history.record_publish("100", "chan2", "m9");
        let destinations: Vec<&str> = history
            .get_entries("100")
            .iter()
            .map(|c| c.destination.as_str())
            .collect();
        assert_eq!(destinations, vec!["chan1", "chan2"]);
    }

    #[test]
    fn test_record_reshare_once_per_account() {
        let mut history = PostHistory::new();
        history.record_publish("100", "chan1", "m1");
        assert!(history.record_reshare("100", "chan1", "B456"));
        assert!(!history.record_reshare("100", "chan1", "B456"));
        assert!(history.record_reshare("100", "chan1", "C789"));
        assert_eq!(
            history.entry_for("100", "chan1").unwrap().reshared_by,
            vec!["B456", "C789"]
        );
        assert!(history.has_reshare("100", "chan1", "B456"));
        assert!(!history.has_reshare("100", "chan2", "B456"));
    }

    #[test]
    fn test_record_reshare_without_copy_is_rejected() {
        let mut history = PostHistory::new();
        assert!(!history.record_reshare("100", "chan1", "B456"));
        assert!(!history.has_entry("100"));
    }

    #[test]
    fn test_serde_roundtrip_is_clean() {
        let mut history = PostHistory::new();
        history.record_publish("100", "chan1", "m1");
        history.record_reshare("100", "chan1", "B456");

        let json = serde_json::to_string(&history).unwrap();
        let restored: PostHistory = serde_json::from_str(&json).unwrap();
        assert!(!restored.is_dirty());
        assert_eq!(restored.get_entries("100"), history.get_entries("100"));
    }

    #[test]
    fn test_resume_marker_set_and_cleared() {
        let mut history = PostHistory::new();
        assert!(!history.set_resume_at("100", "chan1", Some(1)));

        history.record_publish("100", "chan1", "m1");
        history.mark_clean();
        assert!(history.set_resume_at("100", "chan1", Some(1)));
        assert!(history.is_dirty());
        assert!(!history.entry_for("100", "chan1").unwrap().is_complete());

        history.set_resume_at("100", "chan1", None);
        let copy = history.entry_for("100", "chan1").unwrap();
        assert!(copy.is_complete());
        assert_eq!(copy.message_id, "m1");
    }

    #[test]
    fn test_complete_copy_serializes_without_resume_marker() {
        let mut history = PostHistory::new();
        history.record_publish("100", "chan1", "m1");
        let json = serde_json::to_string(&history).unwrap();
        assert!(!json.contains("resume_at"));

        history.set_resume_at("100", "chan1", Some(2));
        let json = serde_json::to_string(&history).unwrap();
        let restored: PostHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.entry_for("100", "chan1").unwrap().resume_at, Some(2));
    }
}
