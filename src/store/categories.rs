//! Category records: a per-site tree upserted during remote scans.
//!
//! Remote data is untrusted, so parent links are checked against cycles at
//! insertion time rather than assuming the scraped tree is well-formed.

use sqlx::Row;
use tracing::instrument;

use super::models::Category;
use super::{Result, Store, StoreError};

/// Input for a category upsert, keyed by (site, url).
#[derive(Debug, Clone)]
pub struct CategoryUpsert<'a> {
    /// Display name.
    pub name: &'a str,
    /// Remote URL (the conflict key within the site).
    pub url: &'a str,
    /// Parent category id, already resolved to a store id.
    pub parent_id: Option<i64>,
}

impl Store {
    /// Inserts or updates a category, returning its id.
    ///
    /// An existing row (same site and url) has its name and parent
    /// overwritten. Setting a parent that would make the category an
    /// ancestor of itself is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CategoryCycle`] when the requested parent chain
    /// loops back to this category, [`StoreError::Database`] on query
    /// failure.
    #[instrument(skip(self, upsert), fields(url = %upsert.url))]
    pub async fn upsert_category(&self, site_id: i64, upsert: &CategoryUpsert<'_>) -> Result<i64> {
        if let Some(parent_id) = upsert.parent_id {
            // The row may already exist; if the new parent's ancestor chain
            // reaches it, the write would close a loop.
            let existing: Option<(i64,)> =
                sqlx::query_as(r"SELECT id FROM categories WHERE site_id = ? AND url = ?")
                    .bind(site_id)
                    .bind(upsert.url)
                    .fetch_optional(self.pool())
                    .await?;

            if let Some((existing_id,)) = existing {
                if parent_id == existing_id
                    || self.is_category_ancestor(existing_id, parent_id).await?
                {
                    return Err(StoreError::CategoryCycle {
                        category_id: existing_id,
                    });
                }
            }
        }

        let row = sqlx::query(
            r"INSERT INTO categories (site_id, name, url, parent_id)
              VALUES (?, ?, ?, ?)
              ON CONFLICT (site_id, url) DO UPDATE SET
                  name = excluded.name,
                  parent_id = excluded.parent_id,
                  updated_at = datetime('now')
              RETURNING id",
        )
        .bind(site_id)
        .bind(upsert.name)
        .bind(upsert.url)
        .bind(upsert.parent_id)
        .fetch_one(self.pool())
        .await?;

        Ok(row.get("id"))
    }

    /// Returns true when `ancestor` appears in the parent chain above
    /// `start`. Walks at most the table's row count, so a pre-existing loop
    /// in stored data cannot hang the check.
    async fn is_category_ancestor(&self, ancestor: i64, start: i64) -> Result<bool> {
        let (total,): (i64,) = sqlx::query_as(r"SELECT COUNT(*) FROM categories")
            .fetch_one(self.pool())
            .await?;

        let mut current = Some(start);
        let mut hops = 0i64;
        while let Some(id) = current {
            if id == ancestor {
                return Ok(true);
            }
            hops += 1;
            if hops > total {
                break;
            }
            let parent: Option<(Option<i64>,)> =
                sqlx::query_as(r"SELECT parent_id FROM categories WHERE id = ?")
                    .bind(id)
                    .fetch_optional(self.pool())
                    .await?;
            current = parent.and_then(|(p,)| p);
        }

        Ok(false)
    }

    /// Gets a category by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let category = sqlx::query_as::<_, Category>(r"SELECT * FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(category)
    }

    /// Lists all categories for a site.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn categories_for_site(&self, site_id: i64) -> Result<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(
            r"SELECT * FROM categories WHERE site_id = ? ORDER BY name, id",
        )
        .bind(site_id)
        .fetch_all(self.pool())
        .await?;

        Ok(categories)
    }

    /// Returns the category names from root to the given category, used to
    /// mirror the remote structure under the local download root.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a lookup fails.
    #[instrument(skip(self))]
    pub async fn category_chain(&self, id: i64) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        // Bounded like the ancestor walk: stored loops terminate the chain.
        let (total,): (i64,) = sqlx::query_as(r"SELECT COUNT(*) FROM categories")
            .fetch_one(self.pool())
            .await?;
        let mut hops = 0i64;

        while let Some(category_id) = current {
            let Some(category) = self.get_category(category_id).await? else {
                break;
            };
            chain.push(category.name);
            current = category.parent_id;
            hops += 1;
            if hops > total {
                break;
            }
        }

        chain.reverse();
        Ok(chain)
    }
}
