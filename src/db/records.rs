//! Delivery record reads and writes.
//!
//! A record exists only for fully delivered posts. Writes touch the reverse
//! partition before the forward one and removals go the other way round, so the
//! forward entry (the one every membership check reads) is always the last to
//! appear and the first to go.

use crate::error::DatabaseError;
use crate::types::{MessageId, PostId};
use crate::{Error, Result};

use super::codec::{decode_message_ids, decode_post_id, encode_message_ids, encode_post_id};
use super::{FORWARD, REVERSE, StateStore};

impl StateStore {
    /// All source ids that have a delivery record, ascending
    pub async fn list_all_source_ids(&self) -> Result<Vec<PostId>> {
        let keys: Vec<Vec<u8>> = sqlx::query_scalar("SELECT key FROM forward ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list source ids: {}",
                    e
                )))
            })?;

        keys.iter()
            .map(|key| decode_post_id(key, FORWARD))
            .collect()
    }

    /// Destination message ids recorded for a source id
    pub async fn get_destination_ids(&self, id: PostId) -> Result<Option<Vec<MessageId>>> {
        let value: Option<Vec<u8>> = sqlx::query_scalar("SELECT value FROM forward WHERE key = ?")
            .bind(encode_post_id(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get destination ids: {}",
                    e
                )))
            })?;

        value
            .map(|bytes| decode_message_ids(&bytes, FORWARD))
            .transpose()
    }

    /// Whether a delivery record exists for a source id
    pub async fn contains(&self, id: PostId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM forward WHERE key = ?")
            .bind(encode_post_id(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to check source id: {}",
                    e
                )))
            })?;
        Ok(found.is_some())
    }

    /// Source id recorded for an exact destination id list
    pub async fn get_source_id(&self, ids: &[MessageId]) -> Result<Option<PostId>> {
        let value: Option<Vec<u8>> = sqlx::query_scalar("SELECT value FROM reverse WHERE key = ?")
            .bind(encode_message_ids(ids))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get source id: {}",
                    e
                )))
            })?;

        value
            .map(|bytes| decode_post_id(&bytes, REVERSE))
            .transpose()
    }

    /// Record that `id` was delivered as `ids`
    ///
    /// Overwrites any previous record for the same source id.
    pub async fn put(&self, id: PostId, ids: &[MessageId]) -> Result<()> {
        let key = encode_post_id(id);
        let value = encode_message_ids(ids);

        sqlx::query("INSERT OR REPLACE INTO reverse (key, value) VALUES (?, ?)")
            .bind(&value)
            .bind(&key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to write reverse record: {}",
                    e
                )))
            })?;

        sqlx::query("INSERT OR REPLACE INTO forward (key, value) VALUES (?, ?)")
            .bind(&key)
            .bind(&value)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to write forward record: {}",
                    e
                )))
            })?;

        tracing::debug!(post_id = id.get(), messages = ids.len(), "Delivery record stored");
        Ok(())
    }

    /// Remove the record for a source id
    ///
    /// A missing record is logged and treated as success.
    pub async fn remove_by_source_id(&self, id: PostId) -> Result<()> {
        let Some(ids) = self.get_destination_ids(id).await? else {
            tracing::warn!(post_id = id.get(), "No delivery record to remove");
            return Ok(());
        };

        sqlx::query("DELETE FROM forward WHERE key = ?")
            .bind(encode_post_id(id))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete forward record: {}",
                    e
                )))
            })?;

        sqlx::query("DELETE FROM reverse WHERE key = ?")
            .bind(encode_message_ids(&ids))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete reverse record: {}",
                    e
                )))
            })?;

        tracing::debug!(post_id = id.get(), "Delivery record removed");
        Ok(())
    }
}
