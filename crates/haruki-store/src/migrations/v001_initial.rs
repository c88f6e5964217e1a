//! v001 -- Initial schema creation.
//!
//! Player documents, toolbox users with their iOS upload codes, game account
//! bindings, webhook endpoints with subscriptions, and OAuth2 access tokens.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Player documents (suite / mysekai / birthday party)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS documents (
    kind         TEXT    NOT NULL,           -- suite | mysekai | mysekai_birthday_party
    server       TEXT    NOT NULL,           -- jp | en | tw | kr | cn
    user_id      INTEGER NOT NULL,           -- game user id
    body         TEXT    NOT NULL,           -- JSON object, key order preserved
    upload_time  INTEGER NOT NULL,           -- unix seconds

    PRIMARY KEY (kind, server, user_id)
);

-- ----------------------------------------------------------------
-- Toolbox users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id               TEXT PRIMARY KEY NOT NULL,
    allow_cn_mysekai INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL           -- RFC-3339
);

-- 1:1 with users
CREATE TABLE IF NOT EXISTS ios_upload_codes (
    code     TEXT PRIMARY KEY NOT NULL,      -- 32 hex chars
    user_id  TEXT NOT NULL UNIQUE,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Game account bindings
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS game_account_bindings (
    server           TEXT    NOT NULL,
    game_user_id     INTEGER NOT NULL,
    toolbox_user_id  TEXT    NOT NULL,
    verified         INTEGER NOT NULL DEFAULT 0,
    suite_privacy    TEXT,                   -- JSON SuitePrivacy
    mysekai_privacy  TEXT,                   -- JSON MysekaiPrivacy
    created_at       TEXT    NOT NULL,

    PRIMARY KEY (server, game_user_id, toolbox_user_id),
    FOREIGN KEY (toolbox_user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- at most one verified owner per game account
CREATE UNIQUE INDEX IF NOT EXISTS idx_bindings_verified
    ON game_account_bindings(server, game_user_id) WHERE verified = 1;

CREATE INDEX IF NOT EXISTS idx_bindings_user
    ON game_account_bindings(toolbox_user_id);

-- ----------------------------------------------------------------
-- Webhooks
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS webhook_endpoints (
    id            TEXT PRIMARY KEY NOT NULL,
    credential    TEXT NOT NULL,
    callback_url  TEXT NOT NULL,
    bearer        TEXT
);

CREATE TABLE IF NOT EXISTS webhook_subscriptions (
    endpoint_id  TEXT    NOT NULL,
    user_id      INTEGER NOT NULL,
    server       TEXT    NOT NULL,
    data_type    TEXT    NOT NULL,

    PRIMARY KEY (endpoint_id, user_id, server, data_type),
    FOREIGN KEY (endpoint_id) REFERENCES webhook_endpoints(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_webhook_subscriptions_target
    ON webhook_subscriptions(user_id, server, data_type);

-- ----------------------------------------------------------------
-- OAuth2 access tokens (issued elsewhere)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS oauth_tokens (
    token       TEXT PRIMARY KEY NOT NULL,
    user_id     TEXT NOT NULL,
    scopes      TEXT NOT NULL,               -- space separated
    expires_at  INTEGER NOT NULL,            -- unix seconds

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
"#;

/// Apply the initial schema.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
