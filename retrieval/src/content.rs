//! The content-store boundary used by reranking.
//!
//! Candidate ids come back from coarse search; their full text lives in
//! whatever store owns the content. Reranking only needs read access.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

/// Read access to item text content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch the text for an item id, if present.
    async fn get_text(&self, id: &str) -> Result<Option<String>>;
}

/// In-memory content store.
#[derive(Default)]
pub struct MemoryContentStore {
    texts: RwLock<HashMap<String, String>>,
}

impl MemoryContentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the text for an item.
    pub async fn insert(&self, id: impl Into<String>, text: impl Into<String>) {
        self.texts.write().await.insert(id.into(), text.into());
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn get_text(&self, id: &str) -> Result<Option<String>> {
        Ok(self.texts.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn insert_and_get_round_trips() {
        let store = MemoryContentStore::new();
        store.insert("e1", "the text").await;

        assert_eq!(store.get_text("e1").await.unwrap(), Some("the text".to_string()));
        assert_eq!(store.get_text("e2").await.unwrap(), None);
    }
}
