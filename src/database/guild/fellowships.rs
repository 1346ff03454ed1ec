//! Fellowship repository
//!
//! Fellowships group characters. Membership rows reference both sides with
//! foreign keys, so deleting a character or a fellowship removes its
//! memberships and adding an unknown character fails.

use crate::database::core::StoreResult;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Repository for fellowship operations
pub struct FellowshipRepository<'a> {
    conn: &'a Connection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FellowshipRecord {
    pub id: i64,
    pub name: String,
    pub channel_id: Option<String>,
    pub created_at: i64,
}

/// A fellowship member, joined with its character
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FellowshipMember {
    pub character_id: i64,
    pub character_name: String,
    pub user_id: String,
    pub joined_at: i64,
}

impl<'a> FellowshipRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a fellowship and return its id
    pub fn create(&self, name: &str, channel_id: Option<&str>) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO fellowships (name, channel_id) VALUES (?1, ?2)",
            params![name, channel_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn find_by_name(&self, name: &str) -> StoreResult<Option<FellowshipRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, channel_id, created_at FROM fellowships WHERE name = ?1",
                [name],
                |row| {
                    Ok(FellowshipRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        channel_id: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    /// Add a character; adding an existing member is a no-op
    pub fn add_member(&self, fellowship_id: i64, character_id: i64) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO fellowship_members (fellowship_id, character_id)
             VALUES (?1, ?2)",
            params![fellowship_id, character_id],
        )?;
        Ok(())
    }

    /// Remove a character; returns whether it was a member
    pub fn remove_member(&self, fellowship_id: i64, character_id: i64) -> StoreResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM fellowship_members WHERE fellowship_id = ?1 AND character_id = ?2",
            params![fellowship_id, character_id],
        )?;
        Ok(removed > 0)
    }

    /// Members of a fellowship, sorted by character name
    pub fn members(&self, fellowship_id: i64) -> StoreResult<Vec<FellowshipMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.name, c.user_id, m.joined_at
             FROM fellowship_members AS m JOIN characters AS c ON m.character_id = c.id
             WHERE m.fellowship_id = ?1
             ORDER BY c.name",
        )?;
        let rows = stmt.query_map([fellowship_id], |row| {
            Ok(FellowshipMember {
                character_id: row.get(0)?,
                character_name: row.get(1)?,
                user_id: row.get(2)?,
                joined_at: row.get(3)?,
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    pub fn delete(&self, fellowship_id: i64) -> StoreResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM fellowships WHERE id = ?1", [fellowship_id])?;
        Ok(deleted > 0)
    }
}
