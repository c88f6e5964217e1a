use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value as Json;
use thiserror::Error;

use haruki_client::ClientError;
use haruki_shared::{CodecError, HarukiError};
use haruki_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// A game API error relayed from an uploaded payload.
    #[error("{message}")]
    Upstream { status: u16, message: String },
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal server error");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = serde_json::json!({
            "status": status.as_u16(),
            "message": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("record not found".into()),
            StoreError::BindingConflict { .. } => ServerError::Forbidden(e.to_string()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<CodecError> for ServerError {
    fn from(e: CodecError) -> Self {
        tracing::warn!(error = %e, "Failed to unpack request body");
        ServerError::BadRequest("failed to unpack request body".into())
    }
}

impl From<ClientError> for ServerError {
    fn from(e: ClientError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl From<HarukiError> for ServerError {
    fn from(e: HarukiError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

/// Success envelope shared by the upload and management routes.
#[derive(Debug, Serialize)]
pub struct ApiMessage {
    pub status: u16,
    pub message: String,
    #[serde(rename = "updatedData", skip_serializing_if = "Option::is_none")]
    pub updated_data: Option<Json>,
}

impl ApiMessage {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK.as_u16(),
            message: message.into(),
            updated_data: None,
        }
    }

    pub fn with_data(mut self, data: Json) -> Self {
        self.updated_data = Some(data);
        self
    }
}

impl IntoResponse for ApiMessage {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        (status, axum::Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(resp: Response) -> Json {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn internal_errors_are_hidden() {
        let resp = ServerError::Internal("disk on fire".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(resp).await;
        assert_eq!(body["message"], "Internal server error");
        assert_eq!(body["status"], 500);
    }

    #[tokio::test]
    async fn upstream_keeps_status() {
        let resp = ServerError::Upstream {
            status: 403,
            message: "session_error".into(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_of(resp).await["message"], "session_error");
    }

    #[test]
    fn store_errors_map() {
        assert_eq!(ServerError::from(StoreError::NotFound).status(), StatusCode::NOT_FOUND);
        let conflict = StoreError::BindingConflict {
            server: "jp".into(),
            game_user_id: 1,
        };
        assert_eq!(ServerError::from(conflict).status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn message_envelope_omits_empty_data() {
        let body = body_of(ApiMessage::ok("done").into_response()).await;
        assert_eq!(body, serde_json::json!({"status": 200, "message": "done"}));
        let body = body_of(
            ApiMessage::ok("done")
                .with_data(serde_json::json!({"userId": 1}))
                .into_response(),
        )
        .await;
        assert_eq!(body["updatedData"]["userId"], 1);
    }
}
