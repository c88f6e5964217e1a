//! Identity checks consumed by the HTTP surfaces.
//!
//! Tokens are issued elsewhere. This module only verifies them: HS256
//! session tokens, opaque OAuth2 access tokens, the private API secret and
//! webhook management tokens.

use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use haruki_shared::constants::SCOPE_GAME_DATA_READ;
use haruki_shared::token;
use haruki_store::{Database, StoreError, ToolboxUser, WebhookEndpoint};

use crate::config::UserSystemConfig;
use crate::error::ServerError;

pub const WEBHOOK_TOKEN_HEADER: &str = "x-haruki-suite-webhook-token";

/// Constant-time string comparison. Length is checked first.
pub fn ct_eq(presented: &str, expected: &str) -> bool {
    let a = presented.as_bytes();
    let b = expected.as_bytes();
    a.len() == b.len() && a.ct_eq(b).unwrap_u8() == 1
}

pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

/// Token from `Authorization`, with or without the `Bearer ` prefix.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth = header_str(headers, AUTHORIZATION).trim();
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth).trim();
    (!token.is_empty()).then_some(token)
}

// ─── Session ───

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub exp: i64,
}

/// Toolbox user id carried by the session token.
pub fn session_user(headers: &HeaderMap, config: &UserSystemConfig) -> Result<String, ServerError> {
    if config.session_sign_key.is_empty() {
        return Err(ServerError::Internal("session_sign_key is not configured".into()));
    }
    let Some(token) = bearer_token(headers) else {
        return Err(ServerError::Unauthorized("missing token".into()));
    };
    let claims: SessionClaims =
        token::verify(token, config.session_sign_key.as_bytes(), now_unix()).map_err(|e| {
            debug!(error = %e, "Session token rejected");
            ServerError::Unauthorized("invalid token".into())
        })?;
    Ok(claims.user_id)
}

/// Session user, additionally required to equal the user named in the path.
pub fn session_user_matching(
    headers: &HeaderMap,
    config: &UserSystemConfig,
    path_user: &str,
) -> Result<String, ServerError> {
    let user = session_user(headers, config)?;
    if user != path_user {
        return Err(ServerError::Unauthorized("user ID mismatch".into()));
    }
    Ok(user)
}

// ─── OAuth2 ───

/// Toolbox user behind an OAuth2 access token holding `game-data:read`.
pub fn oauth_user(db: &Database, headers: &HeaderMap, now: i64) -> Result<String, ServerError> {
    let Some(token) = bearer_token(headers) else {
        return Err(ServerError::Unauthorized("missing token".into()));
    };
    let record = match db.get_oauth_token(token) {
        Ok(record) => record,
        Err(StoreError::NotFound) => return Err(ServerError::Unauthorized("invalid token".into())),
        Err(e) => return Err(e.into()),
    };
    if record.is_expired(now) {
        return Err(ServerError::Unauthorized("token expired".into()));
    }
    if !record.has_scope(SCOPE_GAME_DATA_READ) {
        return Err(ServerError::Forbidden(format!(
            "token lacks required scope {SCOPE_GAME_DATA_READ}"
        )));
    }
    Ok(record.user_id)
}

// ─── Private API ───

pub fn check_private(headers: &HeaderMap, config: &UserSystemConfig) -> Result<(), ServerError> {
    let presented = header_str(headers, AUTHORIZATION);
    if config.private_api_secret.is_empty() || !ct_eq(presented, &config.private_api_secret) {
        return Err(ServerError::Unauthorized("Invalid Authorization header".into()));
    }
    if !config.private_api_user_agent.is_empty()
        && !header_str(headers, USER_AGENT).contains(&config.private_api_user_agent)
    {
        return Err(ServerError::Forbidden("User-Agent not allowed".into()));
    }
    Ok(())
}

// ─── iOS upload code ───

/// Owner of an iOS upload code.
pub fn upload_code_owner(db: &Database, code: &str) -> Result<ToolboxUser, ServerError> {
    if code.is_empty() {
        return Err(ServerError::Unauthorized("missing upload code".into()));
    }
    match db.user_by_upload_code(code) {
        Ok(user) => Ok(user),
        Err(StoreError::NotFound) => Err(ServerError::Unauthorized("invalid upload code".into())),
        Err(e) => Err(e.into()),
    }
}

// ─── Webhook management ───

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookClaims {
    #[serde(rename = "_id")]
    pub id: String,
    pub credential: String,
}

/// Resolves the webhook endpoint a management token speaks for.
pub fn webhook_endpoint(
    db: &Database,
    headers: &HeaderMap,
    config: &UserSystemConfig,
) -> Result<WebhookEndpoint, ServerError> {
    if config.webhook_jwt_secret.is_empty() {
        return Err(ServerError::Internal("webhook_jwt_secret is not configured".into()));
    }
    let token = header_str(headers, WEBHOOK_TOKEN_HEADER).trim();
    if token.is_empty() {
        return Err(ServerError::Unauthorized(
            "Missing X-Haruki-Suite-Webhook-Token header".into(),
        ));
    }
    let claims: WebhookClaims = token::verify(token, config.webhook_jwt_secret.as_bytes(), now_unix())
        .map_err(|e| match e {
            haruki_shared::TokenError::Claims(_) => {
                ServerError::Forbidden("Invalid token payload".into())
            }
            _ => ServerError::Forbidden("Invalid or expired JWT".into()),
        })?;
    if claims.id.is_empty() || claims.credential.is_empty() {
        return Err(ServerError::Forbidden("Invalid token payload".into()));
    }

    let mismatch = || ServerError::Forbidden("Webhook user not found or credential mismatch".into());
    let endpoint = match db.get_webhook_endpoint(&claims.id) {
        Ok(endpoint) => endpoint,
        Err(StoreError::NotFound) => return Err(mismatch()),
        Err(e) => return Err(e.into()),
    };
    if !ct_eq(&claims.credential, &endpoint.credential) {
        return Err(mismatch());
    }
    Ok(endpoint)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use haruki_store::OAuthToken;

    fn users() -> UserSystemConfig {
        UserSystemConfig {
            session_sign_key: "session-key".into(),
            private_api_secret: "private".into(),
            private_api_user_agent: "HarukiBot".into(),
            webhook_jwt_secret: "hook-key".into(),
        }
    }

    fn with_auth(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    pub(crate) fn session_header(user: &str, key: &str) -> String {
        let claims = SessionClaims {
            user_id: user.into(),
            exp: now_unix() + 3600,
        };
        format!("Bearer {}", token::sign(&claims, key.as_bytes()).unwrap())
    }

    #[test]
    fn constant_time_compare() {
        assert!(ct_eq("abc", "abc"));
        assert!(!ct_eq("abc", "abd"));
        assert!(!ct_eq("ab", "abc"));
    }

    #[test]
    fn session_tokens() {
        let config = users();
        let h = with_auth(&session_header("alice", "session-key"));
        assert_eq!(session_user(&h, &config).unwrap(), "alice");
        assert!(session_user_matching(&h, &config, "alice").is_ok());
        assert_eq!(
            session_user_matching(&h, &config, "bob").unwrap_err().to_string(),
            "user ID mismatch"
        );

        let forged = with_auth(&session_header("alice", "other-key"));
        assert_eq!(session_user(&forged, &config).unwrap_err().to_string(), "invalid token");
        assert_eq!(
            session_user(&HeaderMap::new(), &config).unwrap_err().to_string(),
            "missing token"
        );
    }

    #[test]
    fn oauth_scope_and_expiry() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", false).unwrap();
        db.insert_oauth_token(&OAuthToken {
            token: "good".into(),
            user_id: "alice".into(),
            scopes: vec![SCOPE_GAME_DATA_READ.into()],
            expires_at: 2_000,
        })
        .unwrap();
        db.insert_oauth_token(&OAuthToken {
            token: "narrow".into(),
            user_id: "alice".into(),
            scopes: vec!["profile".into()],
            expires_at: 2_000,
        })
        .unwrap();

        assert_eq!(oauth_user(&db, &with_auth("Bearer good"), 1_000).unwrap(), "alice");
        assert!(matches!(
            oauth_user(&db, &with_auth("Bearer good"), 3_000),
            Err(ServerError::Unauthorized(_))
        ));
        assert!(matches!(
            oauth_user(&db, &with_auth("Bearer narrow"), 1_000),
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            oauth_user(&db, &with_auth("Bearer nope"), 1_000),
            Err(ServerError::Unauthorized(_))
        ));
    }

    #[test]
    fn private_api_gate() {
        let config = users();
        let mut h = with_auth("private");
        h.insert(USER_AGENT, HeaderValue::from_static("HarukiBot/1.0"));
        assert!(check_private(&h, &config).is_ok());

        h.insert(USER_AGENT, HeaderValue::from_static("curl/8"));
        assert!(matches!(check_private(&h, &config), Err(ServerError::Forbidden(_))));
        assert!(matches!(
            check_private(&with_auth("wrong"), &config),
            Err(ServerError::Unauthorized(_))
        ));
    }

    #[test]
    fn webhook_tokens() {
        let db = Database::open_in_memory().unwrap();
        db.create_webhook_endpoint(&WebhookEndpoint {
            id: "hook1".into(),
            credential: "cred".into(),
            callback_url: "https://example.test/{user_id}".into(),
            bearer: None,
        })
        .unwrap();
        let config = users();
        let sign = |id: &str, cred: &str| {
            let claims = WebhookClaims {
                id: id.into(),
                credential: cred.into(),
            };
            let mut h = HeaderMap::new();
            let token = token::sign(&claims, b"hook-key").unwrap();
            h.insert(WEBHOOK_TOKEN_HEADER, HeaderValue::from_str(&token).unwrap());
            h
        };

        assert_eq!(webhook_endpoint(&db, &sign("hook1", "cred"), &config).unwrap().id, "hook1");
        assert_eq!(
            webhook_endpoint(&db, &sign("hook1", "bad"), &config).unwrap_err().to_string(),
            "Webhook user not found or credential mismatch"
        );
        assert!(matches!(
            webhook_endpoint(&db, &HeaderMap::new(), &config),
            Err(ServerError::Unauthorized(_))
        ));
    }
}
