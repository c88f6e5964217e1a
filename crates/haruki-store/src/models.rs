//! Domain model structs persisted in the relational tables.
//!
//! Privacy structs serialize with the camelCase names used by the account
//! management frontend so they can be stored and served verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use haruki_shared::{DocumentKind, Server};

// ---------------------------------------------------------------------------
// Toolbox user
// ---------------------------------------------------------------------------

/// A toolbox account. Registration and credentials live elsewhere; the core
/// only needs the id and the CN mysekai permission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolboxUser {
    pub id: String,
    pub allow_cn_mysekai: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Privacy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SuitePrivacy {
    pub allow_public_api: bool,
    pub allow_sakura: bool,
    #[serde(rename = "allow8823")]
    pub allow_8823: bool,
    pub allow_resona: bool,
    pub allow_luna: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MysekaiPrivacy {
    pub allow_public_api: bool,
    pub allow_fixture_api: bool,
    #[serde(rename = "allow8823")]
    pub allow_8823: bool,
    pub allow_resona: bool,
    pub allow_luna: bool,
}

/// Flags consulted by the third-party syncer for one upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkFlags {
    pub sakura: bool,
    pub haruki_8823: bool,
    pub resona: bool,
    pub luna: bool,
}

// ---------------------------------------------------------------------------
// Game account binding
// ---------------------------------------------------------------------------

/// Association between a toolbox user and an in-game account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameAccountBinding {
    pub server: Server,
    pub game_user_id: i64,
    pub toolbox_user_id: String,
    pub verified: bool,
    pub suite: Option<SuitePrivacy>,
    pub mysekai: Option<MysekaiPrivacy>,
    pub created_at: DateTime<Utc>,
}

impl GameAccountBinding {
    /// Whether public reads of the given document kind are allowed.
    /// Birthday party documents follow the mysekai flags.
    pub fn allows_public_api(&self, kind: DocumentKind) -> bool {
        match kind {
            DocumentKind::Suite => self.suite.is_some_and(|p| p.allow_public_api),
            DocumentKind::Mysekai | DocumentKind::BirthdayParty => {
                self.mysekai.is_some_and(|p| p.allow_public_api)
            }
        }
    }

    /// Third-party sink flags for the given document kind. Sakura only takes
    /// suite data.
    pub fn sink_flags(&self, kind: DocumentKind) -> SinkFlags {
        match kind {
            DocumentKind::Suite => self
                .suite
                .map(|p| SinkFlags {
                    sakura: p.allow_sakura,
                    haruki_8823: p.allow_8823,
                    resona: p.allow_resona,
                    luna: p.allow_luna,
                })
                .unwrap_or_default(),
            DocumentKind::Mysekai | DocumentKind::BirthdayParty => self
                .mysekai
                .map(|p| SinkFlags {
                    sakura: false,
                    haruki_8823: p.allow_8823,
                    resona: p.allow_resona,
                    luna: p.allow_luna,
                })
                .unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

/// A registered webhook consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookEndpoint {
    pub id: String,
    pub credential: String,
    /// May contain `{user_id}`, `{server}` and `{data_type}` placeholders.
    pub callback_url: String,
    pub bearer: Option<String>,
}

/// One `(user, server, data_type)` an endpoint listens to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookSubscription {
    pub user_id: i64,
    pub server: Server,
    pub data_type: String,
}

// ---------------------------------------------------------------------------
// OAuth2
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub token: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub expires_at: i64,
}

impl OAuthToken {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expires_at <= now_unix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> GameAccountBinding {
        GameAccountBinding {
            server: Server::Jp,
            game_user_id: 1,
            toolbox_user_id: "u".into(),
            verified: true,
            suite: None,
            mysekai: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn privacy_json_names() {
        let p: SuitePrivacy =
            serde_json::from_str(r#"{"allowPublicApi": true, "allow8823": true}"#).unwrap();
        assert!(p.allow_public_api && p.allow_8823);
        assert!(!p.allow_sakura);
        let back = serde_json::to_value(p).unwrap();
        assert_eq!(back["allow8823"], true);
    }

    #[test]
    fn missing_privacy_denies() {
        let b = binding();
        assert!(!b.allows_public_api(DocumentKind::Suite));
        assert_eq!(b.sink_flags(DocumentKind::Mysekai), SinkFlags::default());
    }

    #[test]
    fn mysekai_never_goes_to_sakura() {
        let mut b = binding();
        b.mysekai = Some(MysekaiPrivacy {
            allow_public_api: true,
            allow_8823: true,
            ..Default::default()
        });
        assert!(b.allows_public_api(DocumentKind::BirthdayParty));
        let flags = b.sink_flags(DocumentKind::Mysekai);
        assert!(flags.haruki_8823 && !flags.sakura);
    }
}
