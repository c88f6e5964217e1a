//! Account-existence check against the sekai-API microservice.

use reqwest::StatusCode;
use serde_json::Value as Json;
use tracing::{error, warn};

use haruki_shared::Server;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountStatus {
    pub server_available: bool,
    pub account_exists: bool,
}

impl AccountStatus {
    const EXISTS: Self = Self {
        server_available: true,
        account_exists: true,
    };
    const MISSING: Self = Self {
        server_available: true,
        account_exists: false,
    };
    const UNAVAILABLE: Self = Self {
        server_available: false,
        account_exists: false,
    };

    /// Both conditions the mysekai validation requires.
    pub fn is_usable(&self) -> bool {
        self.server_available && self.account_exists
    }
}

#[derive(Clone)]
pub struct SekaiApiClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl SekaiApiClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn profile_url(&self, server: Server, user_id: i64) -> String {
        format!("{}/api/{}/{}/profile", self.endpoint, server, user_id)
    }

    pub async fn account_status(&self, server: Server, user_id: i64) -> Result<AccountStatus> {
        let url = self.profile_url(server, user_id);
        let resp = self
            .http
            .get(&url)
            .header("X-Haruki-Sekai-Token", &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        let result = classify(status, &body);
        if !result.server_available {
            error!(%url, %status, "sekai API unavailable");
        } else if !result.account_exists {
            warn!(%url, %status, "sekai API reports unknown account");
        }
        Ok(result)
    }
}

/// Upstream may answer 200 with an error payload, so the body's
/// `errorCode`/`httpStatus` take precedence over the transport status.
pub fn classify(status: StatusCode, body: &[u8]) -> AccountStatus {
    let code = status.as_u16();
    if let Ok(Json::Object(obj)) = serde_json::from_slice::<Json>(body) {
        if obj.contains_key("errorCode") {
            let http_status = obj
                .get("httpStatus")
                .and_then(Json::as_f64)
                .map(|f| f as u16)
                .unwrap_or(0);
            return if http_status == 404 || code == 404 {
                AccountStatus::MISSING
            } else if http_status >= 500 || code >= 500 {
                AccountStatus::UNAVAILABLE
            } else {
                AccountStatus::MISSING
            };
        }
    }
    match code {
        200 => AccountStatus::EXISTS,
        404 => AccountStatus::MISSING,
        _ => AccountStatus::UNAVAILABLE,
    }
}
