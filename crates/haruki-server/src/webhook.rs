//! Webhook fan-out and the subscription management routes.
//!
//! Consumers register an endpoint out of band, then subscribe it to
//! `(server, data_type, user_id)` triples with a signed management token.
//! After a public upload every subscribed callback receives a `POST`.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use tracing::{info, warn};

use haruki_shared::{Server, UploadDataType};
use haruki_store::{WebhookEndpoint, WebhookSubscription};

use crate::api::AppState;
use crate::auth;
use crate::error::{ApiMessage, ServerError};
use crate::sync::expand_url_template;

pub fn webhook_user_agent() -> String {
    format!("Haruki-Suite/{}", env!("CARGO_PKG_VERSION"))
}

// ─── Dispatcher ───

#[derive(Clone)]
pub struct WebhookDispatcher {
    http: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Calls every target back in parallel and returns at once.
    pub fn dispatch(
        &self,
        targets: Vec<WebhookEndpoint>,
        server: Server,
        data_type: UploadDataType,
        user_id: i64,
    ) {
        for target in targets {
            let http = self.http.clone();
            let url = expand_url_template(&target.callback_url, server, data_type, user_id);
            tokio::spawn(async move {
                let mut req = http.post(&url).header(USER_AGENT, webhook_user_agent());
                if let Some(bearer) = target.bearer.as_deref().filter(|b| !b.is_empty()) {
                    req = req.header(AUTHORIZATION, format!("Bearer {bearer}"));
                }
                match req.send().await {
                    Ok(resp) if resp.status().is_success() => {
                        info!(endpoint = %target.id, %url, "Called back WebHook API successfully");
                    }
                    Ok(resp) => {
                        warn!(endpoint = %target.id, %url, status = %resp.status(), "WebHook callback rejected");
                    }
                    Err(e) => {
                        warn!(endpoint = %target.id, %url, error = %e, "WebHook callback failed");
                    }
                }
            });
        }
    }
}

// ─── Management routes ───

fn parse_target(server: &str, data_type: &str, user_id: &str) -> Result<(Server, UploadDataType, i64), ServerError> {
    let server: Server = server.parse()?;
    let data_type: UploadDataType = data_type.parse()?;
    let user_id = user_id
        .parse::<i64>()
        .map_err(|_| ServerError::BadRequest("Invalid userId, it must be integer".into()))?;
    Ok((server, data_type.canonical(), user_id))
}

pub async fn list_subscribers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<WebhookSubscription>>, ServerError> {
    let db = state.db.lock().await;
    let endpoint = auth::webhook_endpoint(&db, &headers, &state.config.user_system)?;
    Ok(Json(db.list_webhook_subscriptions(&endpoint.id)?))
}

pub async fn subscribe(
    State(state): State<AppState>,
    Path((server, data_type, user_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<ApiMessage, ServerError> {
    let (server, data_type, user_id) = parse_target(&server, &data_type, &user_id)?;
    let db = state.db.lock().await;
    let endpoint = auth::webhook_endpoint(&db, &headers, &state.config.user_system)?;
    db.subscribe_webhook(&endpoint.id, user_id, server, data_type.as_str())?;
    info!(endpoint = %endpoint.id, %server, %data_type, user_id, "Webhook subscription added");
    Ok(ApiMessage::ok("Registered webhook push user successfully.").with_data(serde_json::json!({
        "server": server.as_str(),
        "dataType": data_type.as_str(),
        "userId": user_id,
    })))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Path((server, data_type, user_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<ApiMessage, ServerError> {
    let (server, data_type, user_id) = parse_target(&server, &data_type, &user_id)?;
    let db = state.db.lock().await;
    let endpoint = auth::webhook_endpoint(&db, &headers, &state.config.user_system)?;
    db.unsubscribe_webhook(&endpoint.id, user_id, server, data_type.as_str())?;
    info!(endpoint = %endpoint.id, %server, %data_type, user_id, "Webhook subscription removed");
    Ok(ApiMessage::ok("Unregistered webhook push user successfully."))
}
