// The relay daemon: one task that owns all mutable state.
//
// The feed connection runs on its own thread and only touches the event
// queue and the restart flag. Everything else (registry, post history,
// colors, the dispatcher and the supervisor) is owned here and driven by a
// single `tokio::select!` loop:
//
//   dispatch interval   → drain the queue, flush history if it changed
//   supervisor interval → rebuild the stream if the restart flag is set
//   command channel     → run an operator command, post the reply
//   shutdown            → stop the stream, flush registry and history

pub mod dispatch;
pub mod supervisor;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::colors::ColorPrefs;
use crate::commands::{self, CommandContext, CommandRequest};
use crate::feed::{FeedConnection, RestartFlag, StreamSource};
use crate::history::PostHistory;
use crate::queue::EventQueue;
use crate::registry::{RegistrySnapshot, SubscriptionRegistry};
use crate::remote::{ContentApi, Publisher};
use crate::render::Content;
use crate::store::{self, StateStore, COLORS_KEY, HISTORY_KEY, REGISTRY_KEY};

pub use dispatch::{DrainReport, Dispatcher};
pub use supervisor::Supervisor;

/// Pending operator commands before senders start waiting.
const COMMAND_BUFFER: usize = 64;

/// Loop timing.
#[derive(Debug, Clone, Copy)]
pub struct DaemonSettings {
    pub dispatch_interval: Duration,
    pub supervisor_interval: Duration,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_secs(1),
            supervisor_interval: Duration::from_secs(60),
        }
    }
}

/// Remote services the daemon talks to.
pub struct Services {
    pub content: Arc<dyn ContentApi>,
    pub publisher: Arc<dyn Publisher>,
    pub stream: Arc<dyn StreamSource>,
    pub store: Arc<dyn StateStore>,
}

pub struct Daemon {
    registry: SubscriptionRegistry,
    colors: ColorPrefs,
    queue: EventQueue,
    restart: RestartFlag,
    dispatcher: Dispatcher,
    supervisor: Supervisor,
    content: Arc<dyn ContentApi>,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn StateStore>,
    commands_tx: mpsc::Sender<CommandRequest>,
    commands_rx: Option<mpsc::Receiver<CommandRequest>>,
}

impl Daemon {
    /// Build the daemon from persisted state.
    pub async fn load(services: Services) -> Result<Self> {
        let store = services.store;

        let snapshot: RegistrySnapshot = store::load(store.as_ref(), REGISTRY_KEY)
            .await
            .context("Failed to load subscription registry")?;
        let history: PostHistory = store::load(store.as_ref(), HISTORY_KEY)
            .await
            .context("Failed to load post history")?;
        let colors: ColorPrefs = store::load(store.as_ref(), COLORS_KEY)
            .await
            .context("Failed to load color preferences")?;

        let registry = SubscriptionRegistry::from_snapshot(snapshot);
        info!(
            accounts = registry.account_count(),
            channels = registry.channel_count(),
            posts = history.len(),
            colors = colors.len(),
            "State loaded"
        );

        let queue = EventQueue::new();
        let restart = RestartFlag::new();
        let feed = FeedConnection::new(services.stream, queue.clone(), restart.clone());
        let supervisor = Supervisor::new(feed, restart.clone(), Arc::clone(&store));
        let dispatcher = Dispatcher::new(
            queue.clone(),
            Arc::clone(&services.content),
            Arc::clone(&services.publisher),
            history,
        );
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

        Ok(Self {
            registry,
            colors,
            queue,
            restart,
            dispatcher,
            supervisor,
            content: services.content,
            publisher: services.publisher,
            store,
            commands_tx,
            commands_rx: Some(commands_rx),
        })
    }

    /// A handle for submitting operator commands while `run` is active.
    pub fn command_sender(&self) -> mpsc::Sender<CommandRequest> {
        self.commands_tx.clone()
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn history(&self) -> &PostHistory {
        self.dispatcher.history()
    }

    pub fn colors(&self) -> &ColorPrefs {
        &self.colors
    }

    pub fn restart_flag(&self) -> &RestartFlag {
        &self.restart
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Run until `shutdown` resolves, then stop the stream and flush state.
    pub async fn run<F>(mut self, settings: DaemonSettings, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Some(mut commands) = self.commands_rx.take() else {
            anyhow::bail!("Daemon is already running");
        };

        self.supervisor
            .start(&self.registry)
            .context("Failed to start stream")?;

        let mut dispatch_timer = tokio::time::interval(settings.dispatch_interval);
        dispatch_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut supervisor_timer = tokio::time::interval(settings.supervisor_interval);
        supervisor_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately; the stream was
        // just started, so skip it.
        supervisor_timer.tick().await;

        tokio::pin!(shutdown);
        info!("Relay running");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = dispatch_timer.tick() => {
                    self.dispatch_tick().await;
                }
                _ = supervisor_timer.tick() => {
                    self.supervisor_tick().await;
                }
                Some(request) = commands.recv() => {
                    self.handle_command(request).await;
                }
            }
        }

        self.shutdown().await
    }

    /// Drain the queue once and persist the history if it changed.
    pub async fn dispatch_tick(&mut self) -> DrainReport {
        let report = self.dispatcher.drain(&self.registry, &self.colors).await;
        if self.dispatcher.history().is_dirty() {
            if let Err(e) = self.save_history().await {
                warn!(error = %e, "Failed to save post history");
            }
        }
        report
    }

    /// Run one supervisor check. Returns true if the stream was rebuilt.
    pub async fn supervisor_tick(&mut self) -> bool {
        self.supervisor.tick(&mut self.registry).await
    }

    /// Execute a command and post its reply to the channel it came from.
    pub async fn handle_command(&mut self, request: CommandRequest) -> Option<String> {
        let ctx = CommandContext {
            registry: &mut self.registry,
            colors: &mut self.colors,
            queue: &self.queue,
            restart: &self.restart,
            content: self.content.as_ref(),
            store: self.store.as_ref(),
            last_published_at: self.dispatcher.last_published_at(),
            commands: &self.commands_tx,
        };

        let reply = match commands::execute(ctx, &request).await {
            Ok(reply) => reply?,
            Err(e) => {
                warn!(channel = %request.channel, command = ?request.command, error = %e, "Command failed");
                format!("Command failed: {e}")
            }
        };

        if let Err(e) = self
            .publisher
            .send(&request.channel, &Content::text(reply.clone()))
            .await
        {
            warn!(channel = %request.channel, error = %e, "Failed to post command reply");
        }
        Some(reply)
    }

    /// Stop the stream and persist the registry and history.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.supervisor.shutdown(&mut self.registry).await?;
        self.save_history().await?;
        if !self.queue.is_empty() {
            info!(pending = self.queue.len(), "Discarding undelivered events");
        }
        info!("Relay stopped");
        Ok(())
    }

    async fn save_history(&mut self) -> Result<()> {
        store::save(self.store.as_ref(), HISTORY_KEY, self.dispatcher.history()).await?;
        self.dispatcher.history_mut().mark_clean();
        Ok(())
    }
}
