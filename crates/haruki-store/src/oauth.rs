use rusqlite::params;

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::OAuthToken;

impl Database {
    #[cfg(any(test, feature = "test-support"))]
    pub fn insert_oauth_token(&self, token: &OAuthToken) -> Result<()> {
        self.conn().execute(
            "INSERT INTO oauth_tokens (token, user_id, scopes, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                token.token,
                token.user_id,
                token.scopes.join(" "),
                token.expires_at
            ],
        )?;
        Ok(())
    }

    pub fn get_oauth_token(&self, token: &str) -> Result<OAuthToken> {
        self.conn()
            .query_row(
                "SELECT token, user_id, scopes, expires_at FROM oauth_tokens WHERE token = ?1",
                params![token],
                |row| {
                    let scopes: String = row.get(2)?;
                    Ok(OAuthToken {
                        token: row.get(0)?,
                        user_id: row.get(1)?,
                        scopes: scopes.split_whitespace().map(str::to_string).collect(),
                        expires_at: row.get(3)?,
                    })
                },
            )
            .map_err(not_found)
    }

    /// Drops expired tokens; returns how many were removed.
    pub fn purge_expired_oauth_tokens(&self, now_unix: i64) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM oauth_tokens WHERE expires_at <= ?1",
            params![now_unix],
        )?;
        Ok(affected)
    }
}
