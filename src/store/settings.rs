//! Settings records. Consumed only by configuration plumbing; the engine
//! core takes typed parameters and never reads this table.

use tracing::instrument;

use super::models::Setting;
use super::{Result, Store};

impl Store {
    /// Sets a setting value, creating the row if needed.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the upsert fails.
    #[instrument(skip(self, value))]
    pub async fn set_setting(&self, category: &str, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r"INSERT INTO settings (category, key, value)
              VALUES (?, ?, ?)
              ON CONFLICT (category, key) DO UPDATE SET
                  value = excluded.value,
                  updated_at = datetime('now')",
        )
        .bind(category)
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Gets a setting value.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_setting(&self, category: &str, key: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as(r"SELECT value FROM settings WHERE category = ? AND key = ?")
                .bind(category)
                .bind(key)
                .fetch_optional(self.pool())
                .await?;

        Ok(row.and_then(|(value,)| value))
    }

    /// Lists all settings within a category.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_settings(&self, category: &str) -> Result<Vec<Setting>> {
        let settings = sqlx::query_as::<_, Setting>(
            r"SELECT * FROM settings WHERE category = ? ORDER BY key",
        )
        .bind(category)
        .fetch_all(self.pool())
        .await?;

        Ok(settings)
    }
}
