// Remote capability traits: the narrow contracts the pipeline depends on.
//
// The dispatch loop and the operator commands only ever see these traits.
// Implementations: the HTTP adapters in this module tree, and in-process
// fakes in the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::event::{Account, Event};
use crate::render::Content;

/// Failure of a content API call, classified by whether retrying can help.
#[derive(Debug, Error)]
pub enum HydrateError {
    /// Timeout, rate limit, connection failure, upstream 5xx.
    #[error("transient content API failure: {0}")]
    Transient(String),
    /// Deleted or protected content, malformed identifier.
    #[error("permanent content API failure: {0}")]
    Permanent(String),
}

impl HydrateError {
    pub fn is_transient(&self) -> bool {
        matches!(self, HydrateError::Transient(_))
    }
}

/// Failure of a chat API call.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Could not reach the chat service. Worth retrying later.
    #[error("chat connectivity failure: {0}")]
    Connectivity(String),
    /// The chat service answered and refused the request.
    #[error("chat request rejected: {0}")]
    Rejected(String),
}

impl PublishError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, PublishError::Connectivity(_))
    }
}

/// Upstream content API: full-fidelity posts, timelines and account lookup.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Fetch the full version of a post by id.
    async fn get_full_event(&self, event_id: &str) -> Result<Event, HydrateError>;

    /// An account's posts created after `since`, in any order.
    async fn get_timeline(
        &self,
        account_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Event>, HydrateError>;

    /// Look up an account by handle. `Ok(None)` if it does not exist.
    async fn find_account(&self, handle: &str) -> Result<Option<Account>, HydrateError>;

    /// Look up an account by id. `Ok(None)` if it does not exist.
    async fn get_account(&self, account_id: &str) -> Result<Option<Account>, HydrateError>;
}

/// Outbound chat API.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Send a new message and return its id.
    async fn send(&self, channel: &str, content: &Content) -> Result<String, PublishError>;

    /// Replace the content of a message we sent earlier.
    async fn edit(&self, channel: &str, message_id: &str, content: &Content)
        -> Result<(), PublishError>;

    /// Fetch the current content of a message we sent earlier.
    async fn fetch(&self, channel: &str, message_id: &str) -> Result<Content, PublishError>;
}
