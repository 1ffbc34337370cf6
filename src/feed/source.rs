// Stream source contract: what the feed thread reads from.
//
// Streams are blocking on purpose: they are only ever read on the feed
// connection's own OS thread, never on the async scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::event::{AccountId, Event};

/// One item read from an upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// A (possibly abbreviated) post from a followed account.
    Event(Event),
    /// Upstream heartbeat; nothing to do.
    KeepAlive,
    /// Upstream reported an error code.
    Error { status: u16 },
    /// No data arrived within the stall window.
    Timeout,
    /// Upstream closed the stream with a notice.
    Disconnect { notice: String },
}

/// An open stream. `Ok(None)` means the stream ended.
pub trait FeedStream: Send {
    fn next_message(&mut self) -> Result<Option<StreamMessage>>;
}

/// Something that can open a stream filtered to a set of accounts.
pub trait StreamSource: Send + Sync {
    /// Open a stream delivering posts by `follow`.
    ///
    /// Implementations should check `stop` between reads so a connection
    /// that is being torn down exits promptly.
    fn connect(&self, follow: &[AccountId], stop: &StopSignal) -> Result<Box<dyn FeedStream>>;
}

/// Cross-thread request for the feed thread to disconnect.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
