use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use thiserror::Error;

use crate::record::SubscriptionRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("could not serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One page of keys returned by [`SubscriptionStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Pass back to `list` to continue after the last key of this page.
    pub cursor: Option<String>,
    pub list_complete: bool,
}

/// Key/value storage for subscription records.
///
/// Keys are opaque to callers beyond their prefix; values are the raw bytes
/// that were written, which may not parse as a record.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Serializes the record and stores it under its endpoint key, returning the key.
    async fn put_record(&self, record: &SubscriptionRecord) -> Result<String, StoreError> {
        let key = record.key();
        let value = serde_json::to_vec(record)?;
        self.put(&key, &value).await?;
        Ok(key)
    }
}

/// In-process store, ordered by key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        let entries = self.entries();
        let lower = match cursor {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Included(prefix),
        };

        let mut keys: Vec<String> = entries
            .range::<str, _>((lower, Bound::Unbounded))
            .map(|(key, _)| key)
            .skip_while(|key| key.as_str() < prefix)
            .take_while(|key| key.starts_with(prefix))
            .take(limit + 1)
            .cloned()
            .collect();

        let list_complete = keys.len() <= limit;
        keys.truncate(limit);
        let cursor = if list_complete {
            None
        } else {
            keys.last().cloned()
        };

        Ok(ListPage {
            keys,
            cursor,
            list_complete,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries().insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{record::DeliveryMode, subscribe_data::SubscribeData};

    #[tokio::test]
    async fn it_should_page_through_prefixed_keys() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        for key in ["other:1", "sub:a", "sub:b", "sub:c", "zzz"] {
            store.put(key, b"{}").await?;
        }

        let first = store.list("sub:", None, 2).await?;
        assert_eq!(first.keys, vec!["sub:a", "sub:b"]);
        assert!(!first.list_complete);
        assert_eq!(first.cursor.as_deref(), Some("sub:b"));

        let second = store.list("sub:", first.cursor.as_deref(), 2).await?;
        assert_eq!(second.keys, vec!["sub:c"]);
        assert!(second.list_complete);
        assert_eq!(second.cursor, None);

        Ok(())
    }

    #[tokio::test]
    async fn it_should_put_get_and_delete() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let record = SubscriptionRecord::new(
            SubscribeData::new("https://push.example.net/1"),
            DeliveryMode::All,
            vec![],
            None,
        );

        let key = store.put_record(&record).await?;
        assert!(store.contains(&key));

        let raw = store.get(&key).await?.expect("record stored");
        let parsed: SubscriptionRecord = serde_json::from_slice(&raw)?;
        assert_eq!(parsed.endpoint(), "https://push.example.net/1");

        store.delete(&key).await?;
        assert!(store.get(&key).await?.is_none());
        assert!(store.is_empty());

        Ok(())
    }
}
