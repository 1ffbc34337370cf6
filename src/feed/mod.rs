// Feed connection: the live upstream subscription and its health flag.
//
// The stream is read on a dedicated OS thread (see `connection`), and every
// kind of trouble on that thread is reported through the restart flag rather
// than returned to anyone. The stream supervisor watches the flag.

pub mod connection;
pub mod source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use connection::FeedConnection;
pub use source::{FeedStream, StopSignal, StreamMessage, StreamSource};

/// Process-wide request to tear down and rebuild the feed connection.
///
/// Any holder may set it, from any thread. Only the stream supervisor
/// clears it.
#[derive(Debug, Clone, Default)]
pub struct RestartFlag(Arc<AtomicBool>);

impl RestartFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set.
    pub fn clear(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}
