//! Read surfaces over stored player documents.
//!
//! Four routes share one projection: the public API (privacy flags, key
//! whitelist, response cache), the owner's session route, the OAuth2 route
//! and the private route used by first-party services.

use axum::body::Body;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use tracing::debug;

use haruki_shared::compact::{compact_key, is_enum_columnar, restore_enum_columns};
use haruki_shared::constants::PUBLIC_GAMEDATA_FIELDS;
use haruki_shared::{CompactSchema, DocumentKind, Server, UploadDataType};
use haruki_store::StoreError;

use crate::api::AppState;
use crate::auth;
use crate::cache::public_cache_key;
use crate::error::ServerError;

const GAMEDATA_KEY: &str = "userGamedata";
const INTERNAL_FIELDS: [&str; 3] = ["_id", "server", "policy"];

#[derive(Debug, Default, Deserialize)]
pub struct ReadQuery {
    pub key: Option<String>,
}

impl ReadQuery {
    pub fn keys(&self) -> Vec<String> {
        self.key
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Who is reading. Third-party scopes see the whitelisted view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadScope {
    Public,
    OAuth,
    Owner,
    Private,
}

impl ReadScope {
    fn is_third_party(self) -> bool {
        matches!(self, ReadScope::Public | ReadScope::OAuth)
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

pub struct Projection<'a> {
    pub kind: DocumentKind,
    pub keys: Vec<String>,
    pub scope: ReadScope,
    pub allowed_keys: &'a [String],
    pub schema: &'a CompactSchema,
}

impl Projection<'_> {
    /// Rejects keys outside the whitelist for third-party suite reads.
    pub fn check_keys(&self) -> Result<(), ServerError> {
        if !self.scope.is_third_party() || self.kind != DocumentKind::Suite {
            return Ok(());
        }
        for key in &self.keys {
            if key != GAMEDATA_KEY && !self.allowed_keys.contains(key) {
                return Err(ServerError::Forbidden(format!("Invalid request key: {key}")));
            }
        }
        Ok(())
    }

    /// Builds the response body. One requested key yields its bare value.
    pub fn apply(&self, mut doc: Map<String, Json>) -> Json {
        let third_party = self.scope.is_third_party();
        if third_party {
            for field in INTERNAL_FIELDS {
                doc.remove(field);
            }
        }

        if self.keys.is_empty() {
            return match (self.kind, third_party) {
                (DocumentKind::Suite, true) => {
                    let mut out = Map::new();
                    out.insert(GAMEDATA_KEY.into(), self.gamedata(&doc));
                    for key in self.allowed_keys {
                        if key != GAMEDATA_KEY {
                            out.insert(key.clone(), self.field(&doc, key));
                        }
                    }
                    Json::Object(out)
                }
                _ => Json::Object(doc),
            };
        }

        if let [key] = self.keys.as_slice() {
            return self.value_for(&doc, key);
        }
        let mut out = Map::with_capacity(self.keys.len());
        for key in &self.keys {
            out.insert(key.clone(), self.value_for(&doc, key));
        }
        Json::Object(out)
    }

    fn value_for(&self, doc: &Map<String, Json>, key: &str) -> Json {
        if key == GAMEDATA_KEY && self.kind == DocumentKind::Suite {
            return self.gamedata(doc);
        }
        self.field(doc, key)
    }

    fn gamedata(&self, doc: &Map<String, Json>) -> Json {
        let Some(gamedata) = doc.get(GAMEDATA_KEY) else {
            return Json::Object(Map::new());
        };
        if !self.scope.is_third_party() {
            return gamedata.clone();
        }
        let mut out = Map::new();
        if let Some(obj) = gamedata.as_object() {
            for field in PUBLIC_GAMEDATA_FIELDS {
                if let Some(v) = obj.get(field) {
                    out.insert(field.to_string(), v.clone());
                }
            }
        }
        Json::Object(out)
    }

    /// `key` as stored, else its compact sibling restored, else `[]`.
    fn field(&self, doc: &Map<String, Json>, key: &str) -> Json {
        if let Some(v) = doc.get(key) {
            return v.clone();
        }
        match doc.get(&compact_key(key)) {
            Some(v @ Json::Object(columns)) if is_enum_columnar(v) => {
                Json::Array(restore_enum_columns(columns))
            }
            Some(v @ Json::Array(_)) if self.schema.contains(key) => self
                .schema
                .restore_value(key, v.clone())
                .unwrap_or_else(|| Json::Array(Vec::new())),
            _ => Json::Array(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn json_response(body: Bytes) -> Response {
    let mut resp = (StatusCode::OK, Body::from(body)).into_response();
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

fn parse_kind(server: &str, data_type: &str) -> Result<(Server, DocumentKind), ServerError> {
    let server: Server = server.parse()?;
    let data_type: UploadDataType = data_type.parse()?;
    Ok((server, data_type.document_kind()))
}

fn parse_uid(raw: &str, message: &str) -> Result<i64, ServerError> {
    raw.parse::<i64>()
        .map_err(|_| ServerError::BadRequest(message.to_string()))
}

fn player_not_found() -> ServerError {
    ServerError::NotFound("Player data not found.".into())
}

fn encode(value: &Json) -> Result<Bytes, ServerError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| ServerError::Internal(format!("encode response: {e}")))
}

/// `GET /public/:server/:data_type/:user_id`
pub async fn public_read(
    State(state): State<AppState>,
    Path((server, data_type, user_id)): Path<(String, String, String)>,
    Query(query): Query<ReadQuery>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, ServerError> {
    let cache_key = public_cache_key(uri.path(), uri.query());
    if let Some(body) = state.cache.get(&cache_key).await {
        return Ok(json_response(body));
    }

    let (server, kind) = parse_kind(&server, &data_type)?;
    let user_id = parse_uid(&user_id, "Invalid userId, it must be integer")?;
    let projection = Projection {
        kind,
        keys: query.keys(),
        scope: ReadScope::Public,
        allowed_keys: &state.config.backend.public_api_allowed_keys,
        schema: &state.schema,
    };

    let doc = {
        let db = state.db.lock().await;
        let binding = db
            .find_binding(server, user_id)?
            .ok_or_else(|| ServerError::NotFound("account binding not found".into()))?;
        if !binding.allows_public_api(kind) {
            return Err(ServerError::Forbidden(
                "you are not allowed to access this player data.".into(),
            ));
        }
        projection.check_keys()?;
        db.get_document(kind, server, user_id)?.ok_or_else(player_not_found)?
    };

    let body = encode(&projection.apply(doc))?;
    state.cache.put(cache_key, body.clone()).await;
    debug!(%server, user_id, "Public read served");
    Ok(json_response(body))
}

/// `GET /api/user/:toolbox_user_id/game-data/:server/:data_type/:user_id`
pub async fn user_read(
    State(state): State<AppState>,
    Path((toolbox_user_id, server, data_type, user_id)): Path<(String, String, String, String)>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let session_user =
        auth::session_user_matching(&headers, &state.config.user_system, &toolbox_user_id)?;
    owned_read(&state, &session_user, &server, &data_type, &user_id, query, ReadScope::Owner).await
}

/// `GET /api/oauth2/game-data/:server/:data_type/:user_id`
pub async fn oauth_read(
    State(state): State<AppState>,
    Path((server, data_type, user_id)): Path<(String, String, String)>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let token_user = {
        let db = state.db.lock().await;
        auth::oauth_user(&db, &headers, auth::now_unix())?
    };
    owned_read(&state, &token_user, &server, &data_type, &user_id, query, ReadScope::OAuth).await
}

async fn owned_read(
    state: &AppState,
    toolbox_user: &str,
    server: &str,
    data_type: &str,
    user_id: &str,
    query: ReadQuery,
    scope: ReadScope,
) -> Result<Response, ServerError> {
    let (server, kind) = parse_kind(server, data_type)?;
    let user_id = parse_uid(user_id, "Invalid game user_id, it must be integer")?;
    let projection = Projection {
        kind,
        keys: query.keys(),
        scope,
        allowed_keys: &state.config.backend.public_api_allowed_keys,
        schema: &state.schema,
    };
    projection.check_keys()?;

    let doc = {
        let db = state.db.lock().await;
        let binding = match db.get_binding_for_user(server, user_id, toolbox_user) {
            Ok(binding) => binding,
            Err(StoreError::NotFound) => {
                return Err(ServerError::NotFound(
                    "game account binding not found or not owned by you".into(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        if !binding.verified {
            return Err(ServerError::Forbidden("game account binding is not verified".into()));
        }
        db.get_document(kind, server, user_id)?.ok_or_else(player_not_found)?
    };
    Ok(json_response(encode(&projection.apply(doc))?))
}

/// `GET /private/:server/:data_type/:user_id`
pub async fn private_read(
    State(state): State<AppState>,
    Path((server, data_type, user_id)): Path<(String, String, String)>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    auth::check_private(&headers, &state.config.user_system)?;
    let (server, kind) = parse_kind(&server, &data_type)?;
    let user_id = parse_uid(&user_id, "Invalid user_id, must be integer")?;
    let projection = Projection {
        kind,
        keys: query.keys(),
        scope: ReadScope::Private,
        allowed_keys: &state.config.backend.public_api_allowed_keys,
        schema: &state.schema,
    };

    let doc = {
        let db = state.db.lock().await;
        db.get_document(kind, server, user_id)?.ok_or_else(player_not_found)?
    };
    Ok(json_response(encode(&projection.apply(doc))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Json) -> Map<String, Json> {
        v.as_object().unwrap().clone()
    }

    fn projection<'a>(
        kind: DocumentKind,
        keys: &[&str],
        scope: ReadScope,
        allowed: &'a [String],
        schema: &'a CompactSchema,
    ) -> Projection<'a> {
        Projection {
            kind,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            scope,
            allowed_keys: allowed,
            schema,
        }
    }

    fn suite_doc() -> Map<String, Json> {
        obj(json!({
            "_id": 12345,
            "server": "jp",
            "policy": "public",
            "userGamedata": {"userId": 12345, "name": "A", "deck": 1, "secret": "x"},
            "userDecks": [{"deckId": 1}],
            "compactUserCards": {
                "__ENUM__": {"rarity": ["r1", "r2"]},
                "cardId": [1, 2],
                "level": [60, 40]
            },
            "compactUserAreas": [[1, 3], [2, null]]
        }))
    }

    #[test]
    fn single_key_restores_columnar_compact_form() {
        let allowed = vec!["userCards".to_string()];
        let schema = CompactSchema::default();
        let p = projection(DocumentKind::Suite, &["userCards"], ReadScope::Public, &allowed, &schema);
        assert!(p.check_keys().is_ok());
        assert_eq!(
            p.apply(suite_doc()),
            json!([{"cardId": 1, "level": 60}, {"cardId": 2, "level": 40}])
        );
    }

    #[test]
    fn positional_compact_uses_schema() {
        let allowed = vec!["userAreas".to_string()];
        let schema = CompactSchema::from_json_str(r#"{"userAreas": ["areaId", "level"]}"#).unwrap();
        let p = projection(DocumentKind::Suite, &["userAreas"], ReadScope::Public, &allowed, &schema);
        assert_eq!(
            p.apply(suite_doc()),
            json!([{"areaId": 1, "level": 3}, {"areaId": 2}])
        );
    }

    #[test]
    fn gamedata_is_filtered_for_third_parties() {
        let allowed: Vec<String> = Vec::new();
        let schema = CompactSchema::default();
        let p = projection(DocumentKind::Suite, &["userGamedata"], ReadScope::Public, &allowed, &schema);
        assert!(p.check_keys().is_ok());
        assert_eq!(p.apply(suite_doc()), json!({"userId": 12345, "name": "A", "deck": 1}));

        let p = projection(DocumentKind::Suite, &["userGamedata"], ReadScope::Private, &allowed, &schema);
        assert_eq!(p.apply(suite_doc())["secret"], "x");
    }

    #[test]
    fn multiple_keys_keep_request_order() {
        let allowed = vec!["userDecks".to_string(), "userMusics".to_string()];
        let schema = CompactSchema::default();
        let p = projection(
            DocumentKind::Suite,
            &["userMusics", "userGamedata", "userDecks"],
            ReadScope::Public,
            &allowed,
            &schema,
        );
        let out = p.apply(suite_doc());
        let keys: Vec<_> = out.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["userMusics", "userGamedata", "userDecks"]);
        assert_eq!(out["userMusics"], json!([]));
    }

    #[test]
    fn whitelist_rejects_unknown_keys() {
        let allowed = vec!["userDecks".to_string()];
        let schema = CompactSchema::default();
        let p = projection(DocumentKind::Suite, &["userDecks", "userBonds"], ReadScope::Public, &allowed, &schema);
        let err = p.check_keys().unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
        assert_eq!(err.to_string(), "Invalid request key: userBonds");

        let p = projection(DocumentKind::Suite, &["userBonds"], ReadScope::Private, &allowed, &schema);
        assert!(p.check_keys().is_ok());
    }

    #[test]
    fn no_keys_returns_allowed_view() {
        let allowed = vec!["userDecks".to_string()];
        let schema = CompactSchema::default();
        let p = projection(DocumentKind::Suite, &[], ReadScope::Public, &allowed, &schema);
        let out = p.apply(suite_doc());
        assert_eq!(
            out.as_object().unwrap().keys().collect::<Vec<_>>(),
            ["userGamedata", "userDecks"]
        );
    }

    #[test]
    fn mysekai_hides_internal_fields() {
        let schema = CompactSchema::default();
        let doc = obj(json!({"_id": 1, "server": "jp", "policy": "public", "updatedResources": {}}));
        let p = projection(DocumentKind::Mysekai, &[], ReadScope::Public, &[], &schema);
        assert_eq!(p.apply(doc.clone()), json!({"updatedResources": {}}));

        let p = projection(DocumentKind::Mysekai, &[], ReadScope::Private, &[], &schema);
        assert_eq!(p.apply(doc)["_id"], 1);
    }

    #[test]
    fn query_keys_split_and_trim() {
        let q = ReadQuery {
            key: Some("a, b,,c".into()),
        };
        assert_eq!(q.keys(), ["a", "b", "c"]);
        assert!(ReadQuery::default().keys().is_empty());
    }
}
