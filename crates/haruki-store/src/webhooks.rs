use rusqlite::params;

use haruki_shared::Server;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{WebhookEndpoint, WebhookSubscription};

impl Database {
    #[cfg(any(test, feature = "test-support"))]
    pub fn create_webhook_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<()> {
        self.conn().execute(
            "INSERT INTO webhook_endpoints (id, credential, callback_url, bearer)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                endpoint.id,
                endpoint.credential,
                endpoint.callback_url,
                endpoint.bearer,
            ],
        )?;
        Ok(())
    }

    pub fn get_webhook_endpoint(&self, id: &str) -> Result<WebhookEndpoint> {
        self.conn()
            .query_row(
                "SELECT id, credential, callback_url, bearer FROM webhook_endpoints WHERE id = ?1",
                params![id],
                row_to_endpoint,
            )
            .map_err(not_found)
    }

    /// Subscribes `endpoint_id` to uploads of `(user_id, server, data_type)`.
    /// Returns false when the subscription already existed.
    pub fn subscribe_webhook(
        &self,
        endpoint_id: &str,
        user_id: i64,
        server: Server,
        data_type: &str,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO webhook_subscriptions (endpoint_id, user_id, server, data_type)
             VALUES (?1, ?2, ?3, ?4)",
            params![endpoint_id, user_id, server.as_str(), data_type],
        )?;
        Ok(affected > 0)
    }

    pub fn unsubscribe_webhook(
        &self,
        endpoint_id: &str,
        user_id: i64,
        server: Server,
        data_type: &str,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM webhook_subscriptions
             WHERE endpoint_id = ?1 AND user_id = ?2 AND server = ?3 AND data_type = ?4",
            params![endpoint_id, user_id, server.as_str(), data_type],
        )?;
        Ok(affected > 0)
    }

    pub fn list_webhook_subscriptions(&self, endpoint_id: &str) -> Result<Vec<WebhookSubscription>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, server, data_type FROM webhook_subscriptions
             WHERE endpoint_id = ?1
             ORDER BY server ASC, user_id ASC, data_type ASC",
        )?;
        let rows = stmt.query_map(params![endpoint_id], |row| {
            let user_id: i64 = row.get(0)?;
            let server_str: String = row.get(1)?;
            let data_type: String = row.get(2)?;
            let server = server_str.parse::<Server>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok(WebhookSubscription {
                user_id,
                server,
                data_type,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Endpoints to notify for an upload.
    pub fn webhook_targets(
        &self,
        user_id: i64,
        server: Server,
        data_type: &str,
    ) -> Result<Vec<WebhookEndpoint>> {
        let mut stmt = self.conn().prepare(
            "SELECT e.id, e.credential, e.callback_url, e.bearer
             FROM webhook_subscriptions s JOIN webhook_endpoints e ON e.id = s.endpoint_id
             WHERE s.user_id = ?1 AND s.server = ?2 AND s.data_type = ?3",
        )?;
        let rows = stmt.query_map(params![user_id, server.as_str(), data_type], row_to_endpoint)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

fn row_to_endpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<WebhookEndpoint> {
    Ok(WebhookEndpoint {
        id: row.get(0)?,
        credential: row.get(1)?,
        callback_url: row.get(2)?,
        bearer: row.get(3)?,
    })
}
