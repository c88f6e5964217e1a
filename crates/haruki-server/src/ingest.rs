//! Upload ingestion.
//!
//! Every upload surface funnels into [`ingest`]: decrypt, detect relayed
//! game errors, check the user id, validate per data type, normalise,
//! persist, then fan out to third-party sinks and webhooks in the
//! background.

use bytes::Bytes;
use serde_json::{Map, Value as Json};
use tracing::{debug, info, warn};

use haruki_shared::types::extract_user_id;
use haruki_shared::{DocumentKind, Server, UploadDataType, UploadMethod, UploadPolicy};
use haruki_store::GameAccountBinding;

use crate::api::AppState;
use crate::auth::now_unix;
use crate::cache::upload_invalidation_keys;
use crate::error::ServerError;
use crate::patterns;

/// One decoded-to-be upload, whichever surface it came through.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Game wire bytes as the device captured them.
    pub raw: Bytes,
    pub server: Server,
    pub data_type: UploadDataType,
    /// User the route claims the payload belongs to.
    pub expected_uid: Option<i64>,
    /// Toolbox account the upload is attributed to, when known.
    pub toolbox_user: Option<String>,
    pub method: UploadMethod,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A decrypted payload carrying `httpStatus` is a game API error the client
/// relayed instead of data.
pub fn relayed_error(payload: &Map<String, Json>) -> Option<ServerError> {
    let status = payload.get("httpStatus")?;
    let status = status
        .as_u64()
        .or_else(|| status.as_str().and_then(|s| s.parse().ok()))
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(400);
    let message = payload
        .get("errorCode")
        .and_then(Json::as_str)
        .unwrap_or("unknown_error")
        .to_string();
    Some(ServerError::Upstream { status, message })
}

/// The payload's own user id, checked against the one the route expects.
/// Payloads without `userGamedata` take the expected id.
pub fn resolve_user_id(payload: &Map<String, Json>, expected: Option<i64>) -> Result<i64, ServerError> {
    match (extract_user_id(payload), expected) {
        (Some(found), Some(expected)) if found != expected => Err(ServerError::BadRequest(format!(
            "userId {found} in payload does not match request user {expected}"
        ))),
        (Some(found), _) => Ok(found),
        (None, Some(expected)) => Ok(expected),
        (None, None) => Err(ServerError::BadRequest("missing userId".into())),
    }
}

/// Blanks every configured key that is present.
pub fn scrub_suite(payload: &mut Map<String, Json>, remove_keys: &[String]) {
    for key in remove_keys {
        if let Some(value) = payload.get_mut(key) {
            *value = Json::Array(Vec::new());
        }
    }
}

pub fn validate_suite(payload: &Map<String, Json>) -> Result<(), ServerError> {
    if payload.contains_key("userGamedata") || payload.contains_key("userProfile") {
        Ok(())
    } else {
        Err(ServerError::BadRequest(
            "Invalid suite data: missing userGamedata and userProfile".into(),
        ))
    }
}

pub fn mysekai_image_path(payload: &Map<String, Json>) -> Option<&str> {
    payload
        .get("updatedResources")?
        .get("userMysekaiPhotos")?
        .get(0)?
        .get("imagePath")?
        .as_str()
}

/// Image path shape check. Servers that embed the uploader in the path
/// must name `user_id` there.
pub fn check_image_path(server: Server, path: &str, user_id: i64) -> Result<(), ServerError> {
    let invalid = || ServerError::BadRequest("Invalid mysekai data: unexpected image path".into());
    if !server.embeds_user_in_image_path() {
        return if patterns::is_hashed_image_path(path) {
            Ok(())
        } else {
            Err(invalid())
        };
    }
    let embedded = patterns::user_image_path()
        .and_then(|re| re.captures(path))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .ok_or_else(invalid)?;
    if embedded != user_id {
        return Err(ServerError::BadRequest(
            "Invalid mysekai data: image path does not belong to this user".into(),
        ));
    }
    Ok(())
}

/// Keeps only `updatedResources.userMysekaiHarvestMaps`.
pub fn prune_birthday_party(mut payload: Map<String, Json>) -> Result<Map<String, Json>, ServerError> {
    let maps = payload
        .get_mut("updatedResources")
        .and_then(|r| r.as_object_mut())
        .and_then(|r| r.remove("userMysekaiHarvestMaps"))
        .ok_or_else(|| {
            ServerError::BadRequest(
                "Invalid birthday party data: missing userMysekaiHarvestMaps".into(),
            )
        })?;
    let mut resources = Map::new();
    resources.insert("userMysekaiHarvestMaps".into(), maps);
    let mut pruned = Map::new();
    pruned.insert("updatedResources".into(), Json::Object(resources));
    Ok(pruned)
}

fn policy_for(binding: Option<&GameAccountBinding>, kind: DocumentKind) -> UploadPolicy {
    match binding {
        Some(b) if b.allows_public_api(kind) => UploadPolicy::Public,
        _ => UploadPolicy::Private,
    }
}

fn stamp(payload: &mut Map<String, Json>, user_id: i64, server: Server, policy: UploadPolicy, now: i64) {
    payload.insert("_id".into(), Json::from(user_id));
    payload.insert("server".into(), Json::from(server.as_str()));
    payload.insert("policy".into(), Json::from(policy.as_str()));
    payload.insert("upload_time".into(), Json::from(now));
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Runs one upload through the pipeline and returns the game user id.
pub async fn ingest(state: &AppState, upload: Upload) -> Result<i64, ServerError> {
    let Upload {
        raw,
        server,
        data_type,
        expected_uid,
        toolbox_user,
        method,
    } = upload;
    let data_type = data_type.canonical();
    let kind = data_type.document_kind();

    let mut payload = state.codec.unpack_object(&raw, server)?;
    if let Some(err) = relayed_error(&payload) {
        info!(%server, %data_type, %method, error = %err, "Upload carried a game API error");
        return Err(err);
    }
    let user_id = resolve_user_id(&payload, expected_uid)?;

    let mut sync_body = raw;
    match kind {
        DocumentKind::Suite => {
            validate_suite(&payload)?;
            scrub_suite(&mut payload, &state.config.sekai_client.suite_remove_keys);
            state.schema.restore_fields(&mut payload);
        }
        DocumentKind::Mysekai => {
            let path = mysekai_image_path(&payload).ok_or_else(|| {
                ServerError::BadRequest("Invalid mysekai data: missing photo image path".into())
            })?;
            check_image_path(server, path, user_id)?;
            if server.embeds_user_in_image_path() {
                verify_account_exists(state, server, user_id).await?;
            }
        }
        DocumentKind::BirthdayParty => {
            payload = prune_birthday_party(payload)?;
            let packed = state
                .codec
                .pack_json(&Json::Object(payload.clone()), server)
                .map_err(|e| ServerError::Internal(format!("repack birthday party data: {e}")))?;
            sync_body = Bytes::from(packed);
        }
    }

    let now = now_unix();
    let (binding, targets) = {
        let mut db = state.db.lock().await;
        let binding = db.find_binding(server, user_id)?;
        let policy = policy_for(binding.as_ref(), kind);
        stamp(&mut payload, user_id, server, policy, now);

        match kind {
            DocumentKind::Suite => {
                db.upsert_suite(server, user_id, payload, now)?;
            }
            DocumentKind::Mysekai | DocumentKind::BirthdayParty => {
                db.replace_document(kind, server, user_id, &payload, now)?;
            }
        }

        let targets = if policy == UploadPolicy::Public {
            db.webhook_targets(user_id, server, data_type.as_str())?
        } else {
            Vec::new()
        };
        (binding, targets)
    };
    info!(
        %server,
        %data_type,
        %method,
        user_id,
        toolbox_user = toolbox_user.as_deref().unwrap_or("-"),
        "Upload persisted"
    );

    state
        .cache
        .remove(&upload_invalidation_keys(server, data_type, user_id))
        .await;

    if let Some(binding) = &binding {
        state
            .syncer
            .dispatch(binding.sink_flags(kind), server, data_type, user_id, sync_body);
    }
    if !targets.is_empty() {
        debug!(count = targets.len(), user_id, "Dispatching webhooks");
        state.webhooks.dispatch(targets, server, data_type, user_id);
    }

    Ok(user_id)
}

async fn verify_account_exists(state: &AppState, server: Server, user_id: i64) -> Result<(), ServerError> {
    let Some(sekai_api) = &state.sekai_api else {
        debug!(%server, user_id, "Account check not configured, skipping");
        return Ok(());
    };
    match sekai_api.account_status(server, user_id).await {
        Ok(result) if result.is_usable() => Ok(()),
        Ok(_) => Err(ServerError::BadRequest(
            "Game account could not be verified".into(),
        )),
        Err(e) => {
            warn!(%server, user_id, error = %e, "Account check failed");
            Err(ServerError::BadRequest("Game account could not be verified".into()))
        }
    }
}
