use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use haruki_shared::Server;

use crate::database::Database;
use crate::error::{not_found, Result};
#[cfg(any(test, feature = "test-support"))]
use crate::error::StoreError;
use crate::models::{GameAccountBinding, MysekaiPrivacy, SuitePrivacy};

const BINDING_COLUMNS: &str =
    "server, game_user_id, toolbox_user_id, verified, suite_privacy, mysekai_privacy, created_at";

impl Database {
    /// Inserts or updates a binding row. Verification state goes through
    /// [`verify_binding`](Self::verify_binding) so the single-owner rule holds.
    #[cfg(any(test, feature = "test-support"))]
    pub fn upsert_binding(&self, binding: &GameAccountBinding) -> Result<()> {
        self.conn().execute(
            "INSERT INTO game_account_bindings
                 (server, game_user_id, toolbox_user_id, verified, suite_privacy, mysekai_privacy, created_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6)
             ON CONFLICT (server, game_user_id, toolbox_user_id)
             DO UPDATE SET suite_privacy = excluded.suite_privacy,
                           mysekai_privacy = excluded.mysekai_privacy",
            params![
                binding.server.as_str(),
                binding.game_user_id,
                binding.toolbox_user_id,
                privacy_to_sql(binding.suite.as_ref())?,
                privacy_to_sql(binding.mysekai.as_ref())?,
                binding.created_at.to_rfc3339(),
            ],
        )?;
        if binding.verified {
            self.verify_binding(binding.server, binding.game_user_id, &binding.toolbox_user_id)?;
        }
        Ok(())
    }

    /// Marks the binding verified. Fails with [`StoreError::BindingConflict`]
    /// when another user already holds the verified binding.
    #[cfg(any(test, feature = "test-support"))]
    pub fn verify_binding(&self, server: Server, game_user_id: i64, toolbox_user_id: &str) -> Result<()> {
        let owner: Option<String> = self
            .conn()
            .query_row(
                "SELECT toolbox_user_id FROM game_account_bindings
                 WHERE server = ?1 AND game_user_id = ?2 AND verified = 1",
                params![server.as_str(), game_user_id],
                |row| row.get(0),
            )
            .optional()?;
        match owner {
            Some(owner) if owner == toolbox_user_id => return Ok(()),
            Some(_) => {
                return Err(StoreError::BindingConflict {
                    server: server.to_string(),
                    game_user_id,
                })
            }
            None => {}
        }

        let affected = self.conn().execute(
            "UPDATE game_account_bindings SET verified = 1
             WHERE server = ?1 AND game_user_id = ?2 AND toolbox_user_id = ?3",
            params![server.as_str(), game_user_id, toolbox_user_id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// The binding owned by `toolbox_user_id`.
    pub fn get_binding_for_user(
        &self,
        server: Server,
        game_user_id: i64,
        toolbox_user_id: &str,
    ) -> Result<GameAccountBinding> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {BINDING_COLUMNS} FROM game_account_bindings
                     WHERE server = ?1 AND game_user_id = ?2 AND toolbox_user_id = ?3"
                ),
                params![server.as_str(), game_user_id, toolbox_user_id],
                row_to_binding,
            )
            .map_err(not_found)
    }

    /// The authoritative binding of a game account: the verified one when it
    /// exists, otherwise the oldest claim.
    pub fn find_binding(&self, server: Server, game_user_id: i64) -> Result<Option<GameAccountBinding>> {
        let binding = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {BINDING_COLUMNS} FROM game_account_bindings
                     WHERE server = ?1 AND game_user_id = ?2
                     ORDER BY verified DESC, created_at ASC
                     LIMIT 1"
                ),
                params![server.as_str(), game_user_id],
                row_to_binding,
            )
            .optional()?;
        Ok(binding)
    }


}

#[cfg(any(test, feature = "test-support"))]
fn privacy_to_sql<T: serde::Serialize>(privacy: Option<&T>) -> Result<Option<String>> {
    privacy
        .map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::Json)
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_binding(row: &rusqlite::Row<'_>) -> rusqlite::Result<GameAccountBinding> {
    let server_str: String = row.get(0)?;
    let game_user_id: i64 = row.get(1)?;
    let toolbox_user_id: String = row.get(2)?;
    let verified: bool = row.get(3)?;
    let suite_json: Option<String> = row.get(4)?;
    let mysekai_json: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;

    let server: Server = server_str.parse().map_err(|e| conversion_error(0, e))?;
    let suite = suite_json
        .map(|s| serde_json::from_str::<SuitePrivacy>(&s))
        .transpose()
        .map_err(|e| conversion_error(4, e))?;
    let mysekai = mysekai_json
        .map(|s| serde_json::from_str::<MysekaiPrivacy>(&s))
        .transpose()
        .map_err(|e| conversion_error(5, e))?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(6, e))?;

    Ok(GameAccountBinding {
        server,
        game_user_id,
        toolbox_user_id,
        verified,
        suite,
        mysekai,
        created_at,
    })
}
