use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Database-backed caching service for the reporting endpoints.
/// Uses the cache_entries table, so no extra infrastructure is needed.
pub struct CacheService {
    pool: PgPool,
}

impl CacheService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let result: Option<(JsonValue,)> = sqlx::query_as(
            r#"
            SELECT value FROM cache_entries
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match result {
            Some((value,)) => {
                sqlx::query("UPDATE cache_entries SET hit_count = hit_count + 1 WHERE key = $1")
                    .bind(key)
                    .execute(&self.pool)
                    .await?;

                let parsed = serde_json::from_value(value)?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Set a value in cache
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: i32,
    ) -> CacheResult<()> {
        let json_value = serde_json::to_value(value)?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, expires_at)
            VALUES ($1, $2, NOW() + ($3 || ' seconds')::interval)
            ON CONFLICT (key) DO UPDATE
            SET value = $2, expires_at = NOW() + ($3 || ' seconds')::interval, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(json_value)
        .bind(ttl_seconds.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete a specific cache entry
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Invalidate cache entries matching a pattern (SQL LIKE pattern)
    pub async fn invalidate_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key LIKE $1")
            .bind(pattern)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Clean up expired cache entries
    pub async fn cleanup_expired(&self) -> CacheResult<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Cache key builders for the reporting surface
pub mod cache_keys {
    use uuid::Uuid;

    pub fn dashboard_stats() -> String {
        "dashboard:stats".to_string()
    }

    pub fn revenue_by_month() -> String {
        "reporting:revenue:monthly".to_string()
    }

    pub fn top_clients() -> String {
        "reporting:clients:top".to_string()
    }

    pub fn client_stats(client_id: Uuid) -> String {
        format!("reporting:client:{}:stats", client_id)
    }

    pub fn invoice_stats() -> String {
        "reporting:invoices:stats".to_string()
    }

    /// Pattern to invalidate every reporting cache after a billing mutation
    pub fn reporting_pattern() -> String {
        "reporting:%".to_string()
    }
}

/// Default TTL values in seconds
pub mod ttl {
    pub const REPORTING: i32 = 300; // 5 minutes
    pub const DASHBOARD: i32 = 300; // 5 minutes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporting_keys_share_a_prefix() {
        let id = uuid::Uuid::new_v4();
        assert!(cache_keys::revenue_by_month().starts_with("reporting:"));
        assert!(cache_keys::top_clients().starts_with("reporting:"));
        assert!(cache_keys::client_stats(id).starts_with("reporting:"));
        assert!(cache_keys::reporting_pattern().ends_with('%'));
    }
}
