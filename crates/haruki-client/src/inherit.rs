//! Impersonating game client.
//!
//! Drives the account-inherit handshake against the live game API:
//!
//! ```text
//! idle -> cookies -> version -> inherit(preview) -> inherit(execute) -> login -> ready
//! ```
//!
//! Every call is sequential. A failure at any step moves the client into
//! [`ClientState::Error`] and every later call is refused.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use indexmap::IndexMap;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::{debug, info, warn};

use haruki_shared::constants::{GAME_API_TIMEOUT_SECS, JP_COOKIE_URL, REQUEST_DATA_GENERAL};
use haruki_shared::types::user_id_from_json;
use haruki_shared::{token, SekaiCodec, Server, Value};

use crate::error::{ClientError, Result};
use crate::http::build_http_client;

const COOKIE_RETRIES: usize = 4;
const VERSION_RETRIES: usize = 4;

/// Pause between the preview and execute inherit calls.
pub const INHERIT_EXECUTE_DELAY: Duration = Duration::from_secs(1);
/// Pause between the execute inherit call and login.
pub const LOGIN_DELAY: Duration = Duration::from_secs(2);

/// Per-server settings needed to impersonate the game client.
#[derive(Debug, Clone, Default)]
pub struct InheritSettings {
    /// `https://{host}/api`
    pub api_base: String,
    pub version_url: String,
    /// Static headers sent with every call (user agent, platform, ...).
    pub headers: IndexMap<String, String>,
    /// HS256 secret for the inherit verify token.
    pub jwt_secret: String,
    pub proxy: Option<String>,
}

/// What the user submitted.
#[derive(Debug, Clone)]
pub struct InheritCredentials {
    pub inherit_id: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Cookies,
    Version,
    Inherited,
    Ready,
    Error(String),
}

#[derive(Serialize)]
struct InheritClaims<'a> {
    #[serde(rename = "inheritId")]
    inherit_id: &'a str,
    password: &'a str,
}

/// A successful game API response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

pub struct InheritClient {
    server: Server,
    settings: InheritSettings,
    credentials: InheritCredentials,
    codec: Arc<SekaiCodec>,
    http: reqwest::Client,
    headers: IndexMap<String, String>,
    state: ClientState,
    user_id: i64,
    credential: Option<String>,
    login_bonus: bool,
    pacing: bool,
}

impl InheritClient {
    pub fn new(
        server: Server,
        settings: InheritSettings,
        credentials: InheritCredentials,
        codec: Arc<SekaiCodec>,
    ) -> Result<Self> {
        if !server.supports_inherit() {
            return Err(ClientError::UnsupportedServer(server.to_string()));
        }
        let http = build_http_client(
            Duration::from_secs(GAME_API_TIMEOUT_SECS),
            settings.proxy.as_deref(),
        )?;
        let headers = settings.headers.clone();
        Ok(Self {
            server,
            settings,
            credentials,
            codec,
            http,
            headers,
            state: ClientState::Idle,
            user_id: 0,
            credential: None,
            login_bonus: false,
            pacing: true,
        })
    }

    /// Disables the fixed pauses between calls. Tests only.
    #[cfg(test)]
    pub(crate) fn without_pacing(mut self) -> Self {
        self.pacing = false;
        self
    }

    pub fn server(&self) -> Server {
        self.server
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn login_bonus(&self) -> bool {
        self.login_bonus
    }

    pub fn codec(&self) -> &SekaiCodec {
        &self.codec
    }

    /// Runs the whole handshake up to `ready`.
    pub async fn init(&mut self) -> Result<()> {
        let result = self.handshake().await;
        if let Err(e) = &result {
            self.fail(e.to_string());
        }
        result
    }

    async fn handshake(&mut self) -> Result<()> {
        self.state = ClientState::Cookies;
        self.fetch_cookies().await?;
        self.state = ClientState::Version;
        self.fetch_version().await?;

        self.inherit_account(false).await?;
        self.pause(INHERIT_EXECUTE_DELAY).await;
        self.inherit_account(true).await?;
        self.state = ClientState::Inherited;

        self.pause(LOGIN_DELAY).await;
        self.login().await?;
        self.state = ClientState::Ready;
        info!(server = %self.server, user_id = self.user_id, "inherit client ready");
        Ok(())
    }

    fn fail(&mut self, message: String) {
        warn!(server = %self.server, error = %message, "inherit client entered error state");
        self.state = ClientState::Error(message);
    }

    pub(crate) async fn pause(&self, d: Duration) {
        if self.pacing {
            tokio::time::sleep(d).await;
        }
    }

    // ---- cookies / version ----

    async fn fetch_cookies(&mut self) -> Result<()> {
        if self.server != Server::Jp {
            return Ok(());
        }
        for attempt in 1..=COOKIE_RETRIES {
            match self.http.post(JP_COOKIE_URL).send().await {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    let cookie = resp
                        .headers()
                        .get(reqwest::header::SET_COOKIE)
                        .and_then(|v| v.to_str().ok())
                        .filter(|v| !v.is_empty())
                        .map(str::to_string);
                    if let Some(cookie) = cookie {
                        self.headers.insert("Cookie".into(), cookie);
                        debug!("jp cookies parsed");
                        return Ok(());
                    }
                    warn!(attempt, "cookie endpoint returned empty Set-Cookie");
                }
                Ok(resp) => warn!(attempt, status = %resp.status(), "cookie endpoint failed"),
                Err(e) => warn!(attempt, error = %e, "cookie request failed"),
            }
        }
        Err(ClientError::Auth {
            step: "cookies",
            message: "failed to parse cookies after retries".into(),
        })
    }

    async fn fetch_version(&mut self) -> Result<()> {
        for attempt in 1..=VERSION_RETRIES {
            let resp = match self.http.get(&self.settings.version_url).send().await {
                Ok(resp) if resp.status() == StatusCode::OK => resp,
                Ok(resp) => {
                    warn!(attempt, status = %resp.status(), "version manifest request failed");
                    continue;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "version manifest request failed");
                    continue;
                }
            };
            match resp.json::<Json>().await {
                Ok(manifest) => {
                    for (header, value) in version_headers(&manifest) {
                        self.headers.insert(header.to_string(), value);
                    }
                    debug!(server = %self.server, "app version parsed");
                    return Ok(());
                }
                Err(e) => warn!(attempt, error = %e, "version manifest is not JSON"),
            }
        }
        Err(ClientError::Auth {
            step: "version",
            message: "failed to parse game version after retries".into(),
        })
    }

    // ---- inherit / login ----

    /// `execute = false` records the user id, `execute = true` the credential.
    async fn inherit_account(&mut self, execute: bool) -> Result<()> {
        let claims = InheritClaims {
            inherit_id: &self.credentials.inherit_id,
            password: &self.credentials.password,
        };
        let verify_token = token::sign(&claims, self.settings.jwt_secret.as_bytes()).map_err(|e| {
            ClientError::Auth {
                step: "inherit",
                message: e.to_string(),
            }
        })?;
        let path = inherit_path(self.server, &self.credentials.inherit_id, execute);
        let resp = self
            .call_api(
                Method::POST,
                &path,
                Some(general_body()?),
                &[("x-inherit-id-verify-token", verify_token)],
            )
            .await?;
        let body = self.codec.unpack_object(&resp.body, self.server)?;

        if execute {
            let credential = body
                .get("credential")
                .and_then(Json::as_str)
                .ok_or_else(|| ClientError::Auth {
                    step: "inherit",
                    message: "failed to get credential".into(),
                })?;
            self.credential = Some(credential.to_string());
            debug!(server = %self.server, "credential retrieved");
        } else {
            self.user_id = body
                .get("afterUserGamedata")
                .and_then(|g| g.get("userId"))
                .and_then(user_id_from_json)
                .ok_or_else(|| ClientError::Auth {
                    step: "inherit",
                    message: "failed to get userId".into(),
                })?;
            debug!(server = %self.server, user_id = self.user_id, "user id retrieved");
        }
        Ok(())
    }

    async fn login(&mut self) -> Result<()> {
        let Some(credential) = self.credential.clone() else {
            return Err(ClientError::Auth {
                step: "login",
                message: "inherit failed".into(),
            });
        };
        let packed = self.codec.pack(&login_body(&credential), self.server)?;
        let path = format!("/user/{}/auth?refreshUpdatedResources=False", self.user_id);
        let resp = match self.call_api(Method::PUT, &path, Some(packed), &[]).await {
            Ok(resp) => resp,
            Err(ClientError::Api { status: 403, .. }) => {
                return Err(ClientError::Auth {
                    step: "login",
                    message: "account login failed, status=403".into(),
                })
            }
            Err(e) => return Err(e),
        };
        let body = self.codec.unpack_object(&resp.body, self.server)?;
        if let Some(session) = body.get("sessionToken").and_then(Json::as_str) {
            self.headers
                .insert("X-Session-Token".into(), session.to_string());
        }
        if !self.headers.contains_key("X-Session-Token") {
            return Err(ClientError::Auth {
                step: "login",
                message: "login response missing sessionToken".into(),
            });
        }
        Ok(())
    }

    // ---- transport ----

    /// Sends one game API call. Non-200 statuses are errors; a 200 response
    /// refreshes the session token and the login bonus flag.
    pub async fn call_api(
        &mut self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        extra_headers: &[(&str, String)],
    ) -> Result<ApiResponse> {
        if let ClientState::Error(message) = &self.state {
            return Err(ClientError::ErrorState(message.clone()));
        }

        let url = format!("{}{}", self.settings.api_base, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream");
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        for (k, v) in extra_headers {
            req = req.header(*k, v.as_str());
        }
        req = req.header("X-Request-Id", uuid::Uuid::new_v4().to_string());
        if let Some(body) = body {
            req = req.body(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(ClientError::Api {
                endpoint: path.to_string(),
                method: method.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(session) = resp
            .headers()
            .get("X-Session-Token")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            self.headers
                .insert("X-Session-Token".into(), session.to_string());
        }
        if resp
            .headers()
            .get("X-Login-Bonus-Status")
            .and_then(|v| v.to_str().ok())
            == Some("true")
        {
            self.login_bonus = true;
        }

        let body = resp.bytes().await?;
        Ok(ApiResponse { status, body })
    }

    /// Like [`call_api`](Self::call_api) but only logs failures.
    pub async fn call_best_effort(&mut self, method: Method, path: &str, body: Option<Vec<u8>>) {
        if let Err(e) = self.call_api(method, path, body, &[]).await {
            debug!(server = %self.server, path, error = %e, "best-effort call failed");
        }
    }

    /// Decodes an API response body into a JSON object.
    pub fn unpack(&self, body: &[u8]) -> Result<Map<String, Json>> {
        Ok(self.codec.unpack_object(body, self.server)?)
    }
}

/// `/inherit/user/{id}?isExecuteInherit=...`, EN adds its age gate.
pub fn inherit_path(server: Server, inherit_id: &str, execute: bool) -> String {
    let flag = if execute { "True" } else { "False" };
    let mut path = format!("/inherit/user/{inherit_id}?isExecuteInherit={flag}");
    if server == Server::En {
        path.push_str("&isAdult=True&tAge=16");
    }
    path
}

/// The fixed encrypted body sent with inherit and mysekai calls.
pub fn general_body() -> Result<Vec<u8>> {
    BASE64
        .decode(REQUEST_DATA_GENERAL)
        .map_err(|e| ClientError::DataRetrieval(format!("decode general request body: {e}")))
}

pub fn login_body(credential: &str) -> Value {
    Value::ordered([
        ("credential", Value::from(credential)),
        ("deviceId", Value::Nil),
        ("authTriggerType", Value::from("normal")),
    ])
}

/// Maps the version manifest onto request headers. Missing fields map to
/// empty strings.
fn version_headers(manifest: &Json) -> [(&'static str, String); 4] {
    let field = |name: &str| {
        manifest
            .get(name)
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string()
    };
    [
        ("X-App-Version", field("appVersion")),
        ("X-App-Hash", field("appHash")),
        ("X-Data-Version", field("dataVersion")),
        ("X-Asset-Version", field("assetVersion")),
    ]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use haruki_shared::codec::CbcCipher;
    use serde_json::json;

    pub(crate) fn codec() -> Arc<SekaiCodec> {
        let c = CbcCipher::new(&[1u8; 16], &[2u8; 16]).unwrap();
        Arc::new(SekaiCodec::new(c.clone(), c))
    }

    fn creds() -> InheritCredentials {
        InheritCredentials {
            inherit_id: "ABCDEF".into(),
            password: "pw".into(),
        }
    }

    #[test]
    fn inherit_paths() {
        assert_eq!(
            inherit_path(Server::Jp, "ABC", false),
            "/inherit/user/ABC?isExecuteInherit=False"
        );
        assert_eq!(
            inherit_path(Server::En, "ABC", true),
            "/inherit/user/ABC?isExecuteInherit=True&isAdult=True&tAge=16"
        );
    }

    #[test]
    fn general_body_is_one_block() {
        assert_eq!(general_body().unwrap().len(), 16);
    }

    #[test]
    fn login_body_keeps_order() {
        let json = login_body("cred").into_json();
        assert_eq!(
            json.as_object().unwrap().keys().collect::<Vec<_>>(),
            ["credential", "deviceId", "authTriggerType"]
        );
        assert_eq!(json["deviceId"], Json::Null);
    }

    #[test]
    fn version_manifest_headers() {
        let headers = version_headers(&json!({
            "appVersion": "3.0.0", "appHash": "h", "dataVersion": "d"
        }));
        assert_eq!(headers[0], ("X-App-Version", "3.0.0".to_string()));
        assert_eq!(headers[3], ("X-Asset-Version", String::new()));
    }

    #[test]
    fn verify_token_claims() {
        let claims = InheritClaims {
            inherit_id: "ID",
            password: "PW",
        };
        let t = token::sign(&claims, b"secret").unwrap();
        let back: Json = token::verify(&t, b"secret", 0).unwrap();
        assert_eq!(back, json!({"inheritId": "ID", "password": "PW"}));
    }

    #[test]
    fn rejects_servers_without_inherit() {
        let err = InheritClient::new(Server::Tw, InheritSettings::default(), creds(), codec());
        assert!(matches!(err, Err(ClientError::UnsupportedServer(_))));
    }

    #[tokio::test]
    async fn error_state_refuses_calls() {
        let mut client = InheritClient::new(Server::Jp, InheritSettings::default(), creds(), codec())
            .unwrap()
            .without_pacing();
        client.fail("boom".into());
        let err = client.call_api(Method::GET, "/system", None, &[]).await;
        assert!(matches!(err, Err(ClientError::ErrorState(m)) if m == "boom"));
    }

    #[tokio::test]
    async fn login_requires_credential() {
        let mut client = InheritClient::new(Server::En, InheritSettings::default(), creds(), codec())
            .unwrap()
            .without_pacing();
        assert!(matches!(
            client.login().await,
            Err(ClientError::Auth { step: "login", .. })
        ));
    }
}
