//! Character repository
//!
//! Player characters stored in a guild database. Sheet data is kept as an
//! opaque JSON document.

use crate::database::core::StoreResult;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

/// Repository for character operations
pub struct CharacterRepository<'a> {
    conn: &'a Connection,
}

/// A stored character
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterRecord {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub sheet_url: Option<String>,
    pub data: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

const SELECT_COLUMNS: &str =
    "SELECT id, user_id, name, sheet_url, data, created_at, updated_at FROM characters";

impl<'a> CharacterRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a character or replace the sheet data of an existing one
    ///
    /// Characters are unique per (user, name). Returns the character id.
    pub fn upsert(
        &self,
        user_id: &str,
        name: &str,
        sheet_url: Option<&str>,
        data: &Value,
    ) -> StoreResult<i64> {
        let id = self.conn.query_row(
            "INSERT INTO characters (user_id, name, sheet_url, data)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, name) DO UPDATE SET
                 sheet_url = excluded.sheet_url,
                 data = excluded.data,
                 updated_at = strftime('%s', 'now')
             RETURNING id",
            params![user_id, name, sheet_url, data.to_string()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get(&self, id: i64) -> StoreResult<Option<CharacterRecord>> {
        let query = format!("{} WHERE id = ?1", SELECT_COLUMNS);
        Ok(self
            .conn
            .query_row(&query, [id], Self::from_row)
            .optional()?)
    }

    /// Look up a character by owner and name (case-sensitive)
    pub fn find(&self, user_id: &str, name: &str) -> StoreResult<Option<CharacterRecord>> {
        let query = format!("{} WHERE user_id = ?1 AND name = ?2", SELECT_COLUMNS);
        Ok(self
            .conn
            .query_row(&query, params![user_id, name], Self::from_row)
            .optional()?)
    }

    /// All characters owned by a user, sorted by name
    pub fn list_by_user(&self, user_id: &str) -> StoreResult<Vec<CharacterRecord>> {
        let query = format!("{} WHERE user_id = ?1 ORDER BY name", SELECT_COLUMNS);
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([user_id], Self::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Delete a character; returns whether it existed
    pub fn delete(&self, id: i64) -> StoreResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM characters WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    pub fn count(&self) -> StoreResult<u64> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM characters", [], |row| row.get(0))?;
        Ok(count)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<CharacterRecord> {
        let data: String = row.get(4)?;
        let data = serde_json::from_str(&data).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(CharacterRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            sheet_url: row.get(3)?,
            data,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::guild::migrated_in_memory;
    use serde_json::json;

    #[test]
    fn test_upsert_and_find() {
        let db = migrated_in_memory();
        let repo = CharacterRepository::new(&db.conn);

        let id = repo
            .upsert("u1", "Aria", Some("https://sheets/1"), &json!({"might": 3}))
            .unwrap();
        let found = repo.find("u1", "Aria").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.data["might"], 3);
        assert_eq!(found.sheet_url.as_deref(), Some("https://sheets/1"));

        let same_id = repo.upsert("u1", "Aria", None, &json!({"might": 4})).unwrap();
        assert_eq!(same_id, id);
        let updated = repo.get(id).unwrap().unwrap();
        assert_eq!(updated.data["might"], 4);
        assert!(updated.sheet_url.is_none());
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_list_by_user() {
        let db = migrated_in_memory();
        let repo = CharacterRepository::new(&db.conn);
        repo.upsert("u1", "Zed", None, &json!({})).unwrap();
        repo.upsert("u1", "Bram", None, &json!({})).unwrap();
        repo.upsert("u2", "Other", None, &json!({})).unwrap();

        let names: Vec<_> = repo
            .list_by_user("u1")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Bram", "Zed"]);
    }

    #[test]
    fn test_delete() {
        let db = migrated_in_memory();
        let repo = CharacterRepository::new(&db.conn);
        let id = repo.upsert("u1", "Aria", None, &json!({})).unwrap();

        assert!(repo.delete(id).unwrap());
        assert!(!repo.delete(id).unwrap());
        assert!(repo.get(id).unwrap().is_none());
    }
}
