//! Upload surfaces.
//!
//! Each route authenticates its caller its own way, then hands the game wire
//! bytes to [`ingest`]. The iOS chunk and proxy routes ingest in the
//! background so the device is answered without waiting on persistence.

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{info, warn};

use haruki_client::game_proxy::is_relayable_response_header;
use haruki_client::{ClientError, DataRetriever, InheritClient, InheritCredentials, RetrievedData};
use haruki_shared::{Server, UploadDataType, UploadMethod};
use haruki_store::StoreError;

use crate::api::AppState;
use crate::auth;
use crate::chunks::{classify_api_path, resolve_origin};
use crate::envelope;
use crate::error::{ApiMessage, ServerError};
use crate::ingest::{ingest, Upload};

fn parse_target(server: &str, data_type: &str) -> Result<(Server, UploadDataType), ServerError> {
    Ok((server.parse()?, data_type.parse()?))
}

fn parse_uid(raw: &str) -> Result<i64, ServerError> {
    raw.parse::<i64>()
        .map_err(|_| ServerError::BadRequest("Invalid user_id, it must be integer".into()))
}

/// Runs ingestion off the request path; failures are only logged.
fn spawn_ingest(state: AppState, upload: Upload) {
    let (server, data_type, method) = (upload.server, upload.data_type, upload.method);
    tokio::spawn(async move {
        match ingest(&state, upload).await {
            Ok(user_id) => info!(%server, %data_type, %method, user_id, "Background upload ingested"),
            Err(e) => warn!(%server, %data_type, %method, error = %e, "Background upload rejected"),
        }
    });
}

// ─── Manual ───

/// `POST /manual/:server/:user_id/:data_type/upload`
pub async fn manual_upload(
    State(state): State<AppState>,
    Path((server, user_id, data_type)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiMessage, ServerError> {
    let toolbox_user = auth::session_user(&headers, &state.config.user_system)?;
    let (server, data_type) = parse_target(&server, &data_type)?;
    let user_id = parse_uid(&user_id)?;

    {
        let db = state.db.lock().await;
        match db.get_binding_for_user(server, user_id, &toolbox_user) {
            Ok(binding) if binding.verified => {}
            Ok(_) => {
                return Err(ServerError::Forbidden("game account binding is not verified".into()))
            }
            Err(StoreError::NotFound) => {
                return Err(ServerError::Forbidden(
                    "game account binding not found or not owned by you".into(),
                ))
            }
            Err(e) => return Err(e.into()),
        }
    }

    let user_id = ingest(
        &state,
        Upload {
            raw: body,
            server,
            data_type,
            expected_uid: Some(user_id),
            toolbox_user: Some(toolbox_user),
            method: UploadMethod::Manual,
        },
    )
    .await?;
    Ok(ApiMessage::ok(format!(
        "{server} server user {user_id} successfully uploaded {data_type} data."
    )))
}

// ─── HarukiProxy ───

/// `POST /harukiproxy/:server/:user_id/:data_type/upload`
pub async fn haruki_proxy_upload(
    State(state): State<AppState>,
    Path((server, user_id, data_type)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiMessage, ServerError> {
    let proxy = &state.config.haruki_proxy;
    envelope::check_client(&headers, proxy)?;
    let (server, data_type) = parse_target(&server, &data_type)?;
    let user_id = parse_uid(&user_id)?;

    let aad = envelope::envelope_aad(server, user_id, data_type);
    let inner = envelope::open(&body, &proxy.unpack_key, &aad)?;

    let user_id = ingest(
        &state,
        Upload {
            raw: Bytes::from(inner),
            server,
            data_type,
            expected_uid: Some(user_id),
            toolbox_user: None,
            method: UploadMethod::HarukiProxy,
        },
    )
    .await?;
    Ok(ApiMessage::ok(format!(
        "{server} server user {user_id} successfully uploaded {data_type} data."
    )))
}

// ─── Inherit ───

#[derive(Debug, Deserialize)]
pub struct InheritBody {
    pub inherit_id: String,
    pub inherit_password: String,
}

/// Inherit retrieves suite or mysekai snapshots only.
fn inherit_target(data_type: UploadDataType) -> Result<UploadDataType, ServerError> {
    match data_type.canonical() {
        t @ (UploadDataType::Suite | UploadDataType::Mysekai) => Ok(t),
        other => Err(ServerError::BadRequest(format!("Inherit does not support {other} data"))),
    }
}

/// Picks the payload the request asked for out of a retrieval.
pub fn inherit_payload(data: RetrievedData, data_type: UploadDataType) -> Result<Vec<u8>, ServerError> {
    let (payload, name) = match inherit_target(data_type)? {
        UploadDataType::Suite => (data.suite, "suite"),
        _ => (data.mysekai, "mysekai"),
    };
    payload.ok_or_else(|| ServerError::BadRequest(format!("Retrieve {name} data failed.")))
}

/// `POST /inherit/:server/:upload_type/submit`
pub async fn inherit_submit(
    State(state): State<AppState>,
    Path((server, upload_type)): Path<(String, String)>,
    body: Result<Json<InheritBody>, JsonRejection>,
) -> Result<ApiMessage, ServerError> {
    let (server, data_type) = parse_target(&server, &upload_type)?;
    let data_type = inherit_target(data_type)?;
    let Json(body) = body.map_err(|e| ServerError::BadRequest(format!("Validation error: {}", e.body_text())))?;

    if server == Server::En && data_type.is_mysekai_family() {
        return Err(ServerError::Forbidden(
            "Haruki Inherit can not accept EN server's mysekai data upload request at this time.".into(),
        ));
    }
    let settings = state
        .config
        .sekai_client
        .inherit_settings(server)
        .ok_or_else(|| ServerError::BadRequest(format!("Server {server} does not support inherit")))?;

    let client = InheritClient::new(
        server,
        settings,
        InheritCredentials {
            inherit_id: body.inherit_id,
            password: body.inherit_password,
        },
        state.codec.clone(),
    )?;
    let retrieved = DataRetriever::new(client, data_type).run().await.map_err(|e| {
        info!(%server, %data_type, error = %e, "Inherit retrieval failed");
        ServerError::from(e)
    })?;
    let game_user_id = retrieved.user_id;
    let raw = inherit_payload(retrieved, data_type)?;

    let user_id = ingest(
        &state,
        Upload {
            raw: Bytes::from(raw),
            server,
            data_type,
            expected_uid: Some(game_user_id),
            toolbox_user: None,
            method: UploadMethod::Inherit,
        },
    )
    .await?;
    Ok(ApiMessage::ok(format!(
        "{server} server user {user_id} successfully uploaded data."
    )))
}

// ─── iOS script chunks ───

/// Headers the uploader script sends with every chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeaders {
    pub original_url: String,
    pub upload_id: String,
    pub index: usize,
    pub total: usize,
    pub upload_code: Option<String>,
}

impl ChunkHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ServerError> {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        let invalid = || ServerError::BadRequest("Invalid request header".into());

        let original_url = get("x-original-url").ok_or_else(invalid)?;
        let upload_id = get("x-upload-id").ok_or_else(invalid)?;
        let index = get("x-chunk-index").and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
        let total = get("x-total-chunks").and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
        Ok(Self {
            original_url: original_url.to_string(),
            upload_id: upload_id.to_string(),
            index,
            total,
            upload_code: get("x-upload-code").map(str::to_string),
        })
    }
}

/// `POST /ios/script/upload` and `POST /ios/script/:upload_code/upload`
pub async fn ios_chunk_upload(
    State(state): State<AppState>,
    code: Option<Path<String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiMessage, ServerError> {
    let chunk = ChunkHeaders::from_headers(&headers)?;
    let code = code
        .map(|Path(code)| code)
        .or_else(|| chunk.upload_code.clone())
        .unwrap_or_default();
    let owner = {
        let db = state.db.lock().await;
        auth::upload_code_owner(&db, &code)?
    };
    let origin = resolve_origin(&chunk.original_url, &state.config.sekai_client)?;

    if let Some(whole) = state
        .chunks
        .push(&chunk.upload_id, chunk.index, chunk.total, body)
        .await?
    {
        spawn_ingest(
            state.clone(),
            Upload {
                raw: whole,
                server: origin.server,
                data_type: origin.data_type,
                expected_uid: Some(origin.user_id),
                toolbox_user: Some(owner.id),
                method: UploadMethod::IosProxy,
            },
        );
    }
    Ok(ApiMessage::ok("Successfully uploaded data."))
}

// ─── iOS proxy ───

/// `GET|POST /ios/proxy/:server/*path`
///
/// Relays the call to the game and answers with the game's response. A 200
/// response whose path names a known data shape is ingested as well.
pub async fn ios_proxy(
    State(state): State<AppState>,
    Path((server, path)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServerError> {
    let server: Server = server.parse()?;
    let path_and_query = match uri.query() {
        Some(q) => format!("{path}?{q}"),
        None => path.clone(),
    };

    let upstream = state
        .game_proxy
        .forward(server, method, &path_and_query, &headers, body)
        .await
        .map_err(|err| match err {
            e @ ClientError::UnsupportedServer(_) => ServerError::BadRequest(e.to_string()),
            other => {
                warn!(%server, path = %path, error = %other, "Game API relay failed");
                ServerError::Upstream {
                    status: 502,
                    message: "Game API request failed".into(),
                }
            }
        })?;

    if upstream.status.is_success() {
        if let Some((data_type, user_id)) = classify_api_path(&path) {
            spawn_ingest(
                state.clone(),
                Upload {
                    raw: upstream.body.clone(),
                    server,
                    data_type,
                    expected_uid: Some(user_id),
                    toolbox_user: None,
                    method: UploadMethod::IosProxy,
                },
            );
        }
    }

    let mut resp = (upstream.status, Body::from(upstream.body)).into_response();
    for (name, value) in upstream.headers.iter() {
        if is_relayable_response_header(name) {
            resp.headers_mut().append(name.clone(), value.clone());
        }
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn chunk_headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        h
    }

    #[test]
    fn chunk_headers_parse() {
        let h = chunk_headers(&[
            ("x-original-url", "https://jp.game.test/api/suite/user/1"),
            ("x-upload-id", "abc"),
            ("x-chunk-index", "1"),
            ("x-total-chunks", "3"),
            ("x-upload-code", "code1"),
        ]);
        let parsed = ChunkHeaders::from_headers(&h).unwrap();
        assert_eq!(parsed.index, 1);
        assert_eq!(parsed.total, 3);
        assert_eq!(parsed.upload_code.as_deref(), Some("code1"));
    }

    #[test]
    fn chunk_headers_reject_missing_or_bad() {
        let missing = chunk_headers(&[("x-upload-id", "abc")]);
        let err = ChunkHeaders::from_headers(&missing).unwrap_err();
        assert_eq!(err.to_string(), "Invalid request header");

        let bad_index = chunk_headers(&[
            ("x-original-url", "https://jp.game.test/api/suite/user/1"),
            ("x-upload-id", "abc"),
            ("x-chunk-index", "one"),
            ("x-total-chunks", "3"),
        ]);
        assert!(ChunkHeaders::from_headers(&bad_index).is_err());
    }

    #[test]
    fn inherit_payload_selection() {
        let data = |suite: Option<&[u8]>, mysekai: Option<&[u8]>| RetrievedData {
            server: Server::Jp,
            user_id: 1,
            suite: suite.map(<[u8]>::to_vec),
            mysekai: mysekai.map(<[u8]>::to_vec),
        };
        assert_eq!(inherit_payload(data(Some(b"s"), None), UploadDataType::Suite).unwrap(), b"s");
        assert_eq!(
            inherit_payload(data(Some(b"s"), Some(b"m")), UploadDataType::Mysekai).unwrap(),
            b"m"
        );
        let err = inherit_payload(data(Some(b"s"), None), UploadDataType::Mysekai).unwrap_err();
        assert_eq!(err.to_string(), "Retrieve mysekai data failed.");
        let err = inherit_payload(data(None, None), UploadDataType::Suite).unwrap_err();
        assert_eq!(err.to_string(), "Retrieve suite data failed.");

        assert_eq!(
            inherit_payload(data(None, Some(b"m")), UploadDataType::MysekaiForce).unwrap(),
            b"m"
        );
        let err = inherit_payload(data(Some(b"s"), Some(b"m")), UploadDataType::MysekaiBirthdayParty)
            .unwrap_err();
        assert_eq!(err.to_string(), "Inherit does not support mysekai_birthday_party data");
    }
}
