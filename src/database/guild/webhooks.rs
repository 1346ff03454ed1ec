//! Webhook subscription repository
//!
//! Storage only: expiry and renewal policy belong to the caller.

use crate::database::core::StoreResult;
use rusqlite::{params, Connection, Row};
use serde::Serialize;

/// Repository for webhook subscription operations
pub struct WebhookSubscriptionRepository<'a> {
    conn: &'a Connection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookSubscription {
    /// Channel id issued to the push-notification provider
    pub id: String,
    pub character_id: i64,
    pub resource_id: Option<String>,
    /// Discord channel receiving notifications
    pub notify_channel_id: String,
    /// Seconds since the Unix epoch
    pub expires_at: i64,
}

impl<'a> WebhookSubscriptionRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert or replace a subscription by id
    pub fn upsert(&self, subscription: &WebhookSubscription) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO webhook_subscriptions
                 (id, character_id, resource_id, notify_channel_id, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO UPDATE SET
                 character_id = excluded.character_id,
                 resource_id = excluded.resource_id,
                 notify_channel_id = excluded.notify_channel_id,
                 expires_at = excluded.expires_at",
            params![
                subscription.id,
                subscription.character_id,
                subscription.resource_id,
                subscription.notify_channel_id,
                subscription.expires_at,
            ],
        )?;
        Ok(())
    }

    /// Subscriptions of one character
    pub fn list_for_character(&self, character_id: i64) -> StoreResult<Vec<WebhookSubscription>> {
        self.query(
            "SELECT id, character_id, resource_id, notify_channel_id, expires_at
             FROM webhook_subscriptions WHERE character_id = ?1 ORDER BY id",
            character_id,
        )
    }

    /// Subscriptions expiring strictly before `timestamp`, soonest first
    pub fn list_expiring_before(&self, timestamp: i64) -> StoreResult<Vec<WebhookSubscription>> {
        self.query(
            "SELECT id, character_id, resource_id, notify_channel_id, expires_at
             FROM webhook_subscriptions WHERE expires_at < ?1 ORDER BY expires_at, id",
            timestamp,
        )
    }

    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM webhook_subscriptions WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    fn query(&self, sql: &str, param: i64) -> StoreResult<Vec<WebhookSubscription>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([param], Self::from_row)?;

        let mut subscriptions = Vec::new();
        for row in rows {
            subscriptions.push(row?);
        }
        Ok(subscriptions)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<WebhookSubscription> {
        Ok(WebhookSubscription {
            id: row.get(0)?,
            character_id: row.get(1)?,
            resource_id: row.get(2)?,
            notify_channel_id: row.get(3)?,
            expires_at: row.get(4)?,
        })
    }
}
