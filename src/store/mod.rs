// State store: durable snapshots of the registry, post history and colors.
//
// Every document is loaded whole at startup and overwritten whole on flush;
// nothing is updated incrementally. Backends: SQLite (default `sqlite`
// feature), a directory of JSON files, and an in-memory map for tests and
// dry runs.

pub mod json;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Document key for the subscription registry.
pub const REGISTRY_KEY: &str = "registry";
/// Document key for the post history.
pub const HISTORY_KEY: &str = "history";
/// Document key for per-account colors.
pub const COLORS_KEY: &str = "colors";

/// Whole-document key/value storage.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load a document by key. `Ok(None)` if it was never saved.
    async fn get_document(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite a document.
    async fn put_document(&self, key: &str, value: &str) -> Result<()>;
}

/// Load and deserialize a document, falling back to `T::default()` if it
/// has never been saved.
pub async fn load<T>(store: &dyn StateStore, key: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match store.get_document(key).await? {
        Some(json) => serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse stored document '{key}'")),
        None => Ok(T::default()),
    }
}

/// Serialize and overwrite a document.
pub async fn save<T>(store: &dyn StateStore, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize document '{key}'"))?;
    store.put_document(key, &json).await
}
