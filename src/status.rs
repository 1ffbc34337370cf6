// System status display: shows what the state store holds.

use anyhow::Result;
use colored::Colorize;

use crate::colors::ColorPrefs;
use crate::history::PostHistory;
use crate::registry::{RegistrySnapshot, SubscriptionRegistry};
use crate::store::{self, StateStore, COLORS_KEY, HISTORY_KEY, REGISTRY_KEY};

/// Counts derived from the persisted documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSummary {
    pub accounts: usize,
    pub channels: usize,
    pub subscriptions: usize,
    pub published_posts: usize,
    pub published_copies: usize,
    pub colors: usize,
}

pub async fn summarize(store: &dyn StateStore) -> Result<StatusSummary> {
    let snapshot: RegistrySnapshot = store::load(store, REGISTRY_KEY).await?;
    let history: PostHistory = store::load(store, HISTORY_KEY).await?;
    let colors: ColorPrefs = store::load(store, COLORS_KEY).await?;

    let subscriptions = snapshot.0.values().map(Vec::len).sum();
    let registry = SubscriptionRegistry::from_snapshot(snapshot);

    Ok(StatusSummary {
        accounts: registry.account_count(),
        channels: registry.channel_count(),
        subscriptions,
        published_posts: history.len(),
        published_copies: history.copy_count(),
        colors: colors.len(),
    })
}

/// Display system status to the terminal.
pub async fn show(store: &dyn StateStore, location: &str) -> Result<()> {
    let summary = summarize(store).await?;

    println!("{} {}", "State:".bold(), location);

    if summary.accounts == 0 {
        println!("Watched accounts: {}", "none".dimmed());
        println!("  Use the `watch <handle>` command while `feedrelay run` is active");
    } else {
        println!(
            "Watched accounts: {} across {} channels ({} subscriptions)",
            summary.accounts.to_string().green(),
            summary.channels,
            summary.subscriptions
        );
    }

    println!(
        "Published posts: {} ({} channel copies)",
        summary.published_posts, summary.published_copies
    );
    println!("Account colors: {}", summary.colors);

    Ok(())
}
