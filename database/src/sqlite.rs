use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};
use tracing::info;

use crate::store::{ListPage, StoreError, SubscriptionStore};

/// Subscription store backed by a single SQLite key/value table.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        info!("Connected to {}.", database_url);
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool and brings its schema up to date.
    pub async fn from_pool(pool: Pool<Sqlite>) -> Result<Self, StoreError> {
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        let fetch = i64::try_from(limit.saturating_add(1)).unwrap_or(i64::MAX);

        let mut keys: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT key FROM subscriptions
            WHERE
                substr(key, 1, length($1)) = $1
                AND
                key > $2
            ORDER BY key
            LIMIT $3
        "#,
        )
        .bind(prefix)
        .bind(cursor.unwrap_or(""))
        .bind(fetch)
        .fetch_all(&self.pool)
        .await?;

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
        let data = sqlx::query_scalar("SELECT data FROM subscriptions WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(data)
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (key, data, updated_at) VALUES ($1, $2, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM subscriptions WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
