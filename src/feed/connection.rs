// Feed connection manager: owns the stream thread.
//
// `start` spawns a named OS thread that connects to the stream source and
// pushes every delivered post onto the event queue, unfiltered. Relevance is
// decided later, per destination, by the dispatch loop.
//
// The thread never returns errors. Upstream error codes, stalls, disconnect
// notices, read failures, the stream ending and even a panic all end the
// thread with the restart flag set, unless the thread was asked to stop.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::source::{StopSignal, StreamMessage, StreamSource};
use super::RestartFlag;
use crate::event::{AccountId, FeedEvent};
use crate::queue::EventQueue;

struct Worker {
    handle: JoinHandle<()>,
    stop: StopSignal,
}

pub struct FeedConnection {
    source: Arc<dyn StreamSource>,
    queue: EventQueue,
    restart: RestartFlag,
    worker: Option<Worker>,
    /// Threads told to stop during a rebuild but not joined yet.
    retired: Vec<JoinHandle<()>>,
}

impl FeedConnection {
    pub fn new(source: Arc<dyn StreamSource>, queue: EventQueue, restart: RestartFlag) -> Self {
        Self {
            source,
            queue,
            restart,
            worker: None,
            retired: Vec::new(),
        }
    }

    /// Open the stream for `follow` on a new thread.
    ///
    /// With nothing to follow there is nothing to connect to; the connection
    /// stays idle until the next rebuild.
    pub fn start(&mut self, follow: Vec<AccountId>) -> Result<()> {
        if self.worker.is_some() {
            anyhow::bail!("Feed connection is already running; stop it first");
        }

        if follow.is_empty() {
            info!("No accounts to follow, stream left idle");
            return Ok(());
        }

        let stop = StopSignal::new();
        let source = Arc::clone(&self.source);
        let queue = self.queue.clone();
        let restart = self.restart.clone();
        let thread_stop = stop.clone();
        let follow_count = follow.len();

        let handle = std::thread::Builder::new()
            .name("feed-stream".to_string())
            .spawn(move || run_stream(source.as_ref(), &follow, &queue, &restart, &thread_stop))
            .context("Failed to spawn feed stream thread")?;

        self.worker = Some(Worker { handle, stop });
        info!(accounts = follow_count, "Stream started");
        Ok(())
    }

    /// Ask the stream thread to disconnect without waiting for it.
    ///
    /// A blocked read can keep the old thread alive for a moment; it is
    /// joined by the next `stop`. A new connection may start right away.
    pub fn retire(&mut self) {
        self.retired.retain(|handle| !handle.is_finished());
        if let Some(worker) = self.worker.take() {
            worker.stop.stop();
            self.retired.push(worker.handle);
            debug!(retired = self.retired.len(), "Stream thread retired");
        }
    }

    /// Ask the stream thread to disconnect and wait for it, and for every
    /// retired thread, to exit.
    ///
    /// The joins happen on tokio's blocking pool so the scheduler keeps
    /// running while the threads finish their current reads.
    pub async fn stop(&mut self) {
        let current = self.worker.take().map(|worker| {
            worker.stop.stop();
            worker.handle
        });
        let stopping_current = current.is_some();
        let handles: Vec<JoinHandle<()>> = self.retired.drain(..).chain(current).collect();
        if handles.is_empty() {
            return;
        }

        let joined = tokio::task::spawn_blocking(move || {
            handles
                .into_iter()
                .map(JoinHandle::join)
                .filter(Result::is_err)
                .count()
        })
        .await;

        match joined {
            Ok(0) => {
                if stopping_current {
                    info!("Stream stopped");
                }
            }
            Ok(panicked) => warn!(panicked, "Stream thread panicked before it was stopped"),
            Err(e) => warn!(error = %e, "Failed to join stream thread"),
        }
    }

    /// Whether a stream thread exists and has not exited yet.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }
}

/// Sets the restart flag when the stream thread exits on its own,
/// including by unwinding.
struct RestartOnExit<'a> {
    restart: &'a RestartFlag,
    stop: &'a StopSignal,
}

impl Drop for RestartOnExit<'_> {
    fn drop(&mut self) {
        if !self.stop.is_stopped() {
            self.restart.set();
            info!("Stream terminated, awaiting restart");
        }
    }
}

fn run_stream(
    source: &dyn StreamSource,
    follow: &[AccountId],
    queue: &EventQueue,
    restart: &RestartFlag,
    stop: &StopSignal,
) {
    let _guard = RestartOnExit { restart, stop };

    let mut stream = match source.connect(follow, stop) {
        Ok(stream) => {
            info!(accounts = follow.len(), "Stream connected");
            stream
        }
        Err(e) => {
            warn!(error = %e, "Stream connection failed");
            return;
        }
    };

    while !stop.is_stopped() {
        match stream.next_message() {
            Ok(Some(StreamMessage::Event(event))) => {
                debug!(event_id = %event.id, author = %event.author.id, "Stream delivered event");
                queue.push(FeedEvent::Streamed(event));
            }
            Ok(Some(StreamMessage::KeepAlive)) => {}
            Ok(Some(StreamMessage::Error { status })) => {
                warn!(status, "Stream error");
                return;
            }
            Ok(Some(StreamMessage::Timeout)) => {
                warn!("Stream timeout");
                return;
            }
            Ok(Some(StreamMessage::Disconnect { notice })) => {
                warn!(notice = %notice, "Stream disconnected");
                return;
            }
            Ok(None) => {
                info!("Stream ended");
                return;
            }
            Err(e) => {
                if !stop.is_stopped() {
                    warn!(error = %e, "Stream read failed");
                }
                return;
            }
        }
    }
}
