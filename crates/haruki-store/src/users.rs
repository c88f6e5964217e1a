use chrono::{DateTime, Utc};
use rusqlite::params;
#[cfg(any(test, feature = "test-support"))]
use uuid::Uuid;

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::ToolboxUser;

impl Database {
    #[cfg(any(test, feature = "test-support"))]
    pub fn create_user(&self, id: &str, allow_cn_mysekai: bool) -> Result<ToolboxUser> {
        let user = ToolboxUser {
            id: id.to_string(),
            allow_cn_mysekai,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO users (id, allow_cn_mysekai, created_at) VALUES (?1, ?2, ?3)",
            params![user.id, user.allow_cn_mysekai, user.created_at.to_rfc3339()],
        )?;
        Ok(user)
    }

    // ---- iOS upload codes ----

    /// Issues a fresh 32-hex-char upload code, replacing the user's previous
    /// one.
    #[cfg(any(test, feature = "test-support"))]
    pub fn issue_upload_code(&self, user_id: &str) -> Result<String> {
        let code = Uuid::new_v4().simple().to_string();
        self.conn().execute(
            "INSERT INTO ios_upload_codes (code, user_id) VALUES (?1, ?2)
             ON CONFLICT (user_id) DO UPDATE SET code = excluded.code",
            params![code, user_id],
        )?;
        Ok(code)
    }

    /// Resolves an upload code to its owner.
    pub fn user_by_upload_code(&self, code: &str) -> Result<ToolboxUser> {
        self.conn()
            .query_row(
                "SELECT u.id, u.allow_cn_mysekai, u.created_at
                 FROM ios_upload_codes c JOIN users u ON u.id = c.user_id
                 WHERE c.code = ?1",
                params![code],
                row_to_user,
            )
            .map_err(not_found)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToolboxUser> {
    let id: String = row.get(0)?;
    let allow_cn_mysekai: bool = row.get(1)?;
    let created_str: String = row.get(2)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(ToolboxUser {
        id,
        allow_cn_mysekai,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn upload_code_owner_carries_cn_flag() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", false).unwrap();
        db.create_user("bob", true).unwrap();
        let alice = db.issue_upload_code("alice").unwrap();
        let bob = db.issue_upload_code("bob").unwrap();

        assert!(!db.user_by_upload_code(&alice).unwrap().allow_cn_mysekai);
        assert!(db.user_by_upload_code(&bob).unwrap().allow_cn_mysekai);
        assert!(matches!(db.user_by_upload_code("nope"), Err(StoreError::NotFound)));
    }

    #[test]
    fn upload_code_is_one_per_user() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", false).unwrap();

        let first = db.issue_upload_code("alice").unwrap();
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(db.user_by_upload_code(&first).unwrap().id, "alice");

        let second = db.issue_upload_code("alice").unwrap();
        assert_ne!(first, second);
        assert_eq!(db.user_by_upload_code(&second).unwrap().id, "alice");
        assert!(matches!(
            db.user_by_upload_code(&first),
            Err(StoreError::NotFound)
        ));
    }
}
