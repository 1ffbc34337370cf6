// In-memory state store: nothing survives the process.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::StateStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys in the order they were written, one entry per write.
    pub async fn write_log(&self) -> Vec<String> {
        self.writes.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_document(&self, key: &str) -> Result<Option<String>> {
        Ok(self.documents.lock().await.get(key).cloned())
    }

    async fn put_document(&self, key: &str, value: &str) -> Result<()> {
        self.documents
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        self.writes.lock().await.push(key.to_string());
        Ok(())
    }
}
