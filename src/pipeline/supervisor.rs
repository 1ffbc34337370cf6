// Stream supervisor: rebuild the feed connection when it asks for it.
//
// The feed thread never restarts itself. It sets the restart flag and
// exits; operator commands set the same flag when the follow set changes.
// On each tick the supervisor notices the flag, retires the old connection,
// starts it again with the registry's current accounts and persists the
// registry. It is the only writer of the persisted registry while running.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::feed::{FeedConnection, RestartFlag};
use crate::registry::SubscriptionRegistry;
use crate::store::{self, StateStore, REGISTRY_KEY};

pub struct Supervisor {
    feed: FeedConnection,
    restart: RestartFlag,
    store: Arc<dyn StateStore>,
    rebuilds: u64,
}

impl Supervisor {
    pub fn new(feed: FeedConnection, restart: RestartFlag, store: Arc<dyn StateStore>) -> Self {
        Self {
            feed,
            restart,
            store,
            rebuilds: 0,
        }
    }

    /// Start the initial connection.
    pub fn start(&mut self, registry: &SubscriptionRegistry) -> Result<()> {
        self.feed.start(registry.accounts())
    }

    /// One watchdog tick. Returns true if the connection was rebuilt.
    ///
    /// The flag is cleared before the new connection starts, so a failure
    /// reported by the new connection is never lost.
    pub async fn tick(&mut self, registry: &mut SubscriptionRegistry) -> bool {
        if !self.restart.is_set() {
            return false;
        }

        info!("Restarting stream");
        self.feed.retire();
        self.restart.clear();

        if let Err(e) = self.feed.start(registry.accounts()) {
            warn!(error = %e, "Failed to restart stream, will retry next tick");
            self.restart.set();
        }
        self.rebuilds += 1;

        self.persist_registry(registry).await;
        true
    }

    /// Stop the connection and persist the registry unconditionally.
    pub async fn shutdown(&mut self, registry: &mut SubscriptionRegistry) -> Result<()> {
        self.feed.stop().await;
        store::save(self.store.as_ref(), REGISTRY_KEY, &registry.snapshot()).await?;
        registry.mark_clean();
        info!(accounts = registry.account_count(), "Registry saved");
        Ok(())
    }

    /// How many times the connection has been rebuilt.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn restart_flag(&self) -> &RestartFlag {
        &self.restart
    }

    pub fn is_streaming(&self) -> bool {
        self.feed.is_running()
    }

    async fn persist_registry(&self, registry: &mut SubscriptionRegistry) {
        match store::save(self.store.as_ref(), REGISTRY_KEY, &registry.snapshot()).await {
            Ok(()) => registry.mark_clean(),
            Err(e) => warn!(error = %e, "Failed to save registry, will retry on next restart or shutdown"),
        }
    }
}
