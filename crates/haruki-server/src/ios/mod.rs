//! iOS MITM module generator.
//!
//! `GET /ios/module/:upload_code/:file_name` renders a module for one of the
//! supported proxy apps. The file name selects regions, data types and the
//! app (`jp-en-haruki-toolbox-suite-mysekai.sgmodule`). Query parameters
//! pick the upload mode, the endpoint and the chunk size of the companion
//! script served by `GET /ios/script/:upload_code/haruki-toolbox.js`.

pub mod generator;
pub mod rules;
pub mod script;

use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::info;

use haruki_shared::{Server, UploadDataType};

use crate::api::AppState;
use crate::auth;
use crate::error::ServerError;
use crate::patterns;

use generator::ModuleMeta;

pub const MIN_CHUNK_MB: u32 = 1;
pub const MAX_CHUNK_MB: u32 = 10;

// ─── Request model ───

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyApp {
    Surge,
    Loon,
    QuantumultX,
    Stash,
}

impl ProxyApp {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "sgmodule" => Some(ProxyApp::Surge),
            "lnplugin" => Some(ProxyApp::Loon),
            "conf" => Some(ProxyApp::QuantumultX),
            "stoverride" => Some(ProxyApp::Stash),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ProxyApp::Surge => "sgmodule",
            ProxyApp::Loon => "lnplugin",
            ProxyApp::QuantumultX => "conf",
            ProxyApp::Stash => "stoverride",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ProxyApp::Stash => "text/yaml; charset=utf-8",
            _ => "text/plain; charset=utf-8",
        }
    }

    pub fn supports_scripts(&self) -> bool {
        !matches!(self, ProxyApp::QuantumultX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// 307 redirect through the backend proxy surface.
    Proxy,
    /// Response script posting the body in chunks.
    Script,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Direct,
    Cdn,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Direct => "direct",
            EndpointKind::Cdn => "cdn",
        }
    }

    fn parse(raw: Option<&str>) -> Result<Self, ServerError> {
        match raw.unwrap_or("direct") {
            "direct" => Ok(EndpointKind::Direct),
            "cdn" => Ok(EndpointKind::Cdn),
            other => Err(ServerError::BadRequest(format!(
                "unsupported endpoint: {other}. Supported: direct, cdn"
            ))),
        }
    }
}

fn parse_chunk_size(raw: Option<&str>) -> Result<u32, ServerError> {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return Ok(MIN_CHUNK_MB);
    };
    raw.parse::<u32>()
        .ok()
        .filter(|n| (MIN_CHUNK_MB..=MAX_CHUNK_MB).contains(n))
        .ok_or_else(|| ServerError::BadRequest("chunk must be between 1 and 10 MB".into()))
}

#[derive(Debug, Default, Deserialize)]
pub struct ModuleQuery {
    pub mode: Option<String>,
    pub endpoint: Option<String>,
    pub chunk: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRequest {
    pub upload_code: String,
    pub regions: Vec<Server>,
    pub data_types: Vec<UploadDataType>,
    pub app: ProxyApp,
    pub mode: UploadMode,
    pub chunk_size_mb: u32,
    pub endpoint: EndpointKind,
}

impl ModuleRequest {
    /// Validates a module file name and its query parameters.
    pub fn parse(upload_code: &str, file_name: &str, query: &ModuleQuery) -> Result<Self, ServerError> {
        let file_name = file_name.trim_start_matches('/');
        let caps = patterns::module_file_name()
            .and_then(|re| re.captures(file_name))
            .ok_or_else(|| {
                ServerError::BadRequest(
                    "invalid module path format. Expected: {regions}-haruki-toolbox-{datatypes}.{ext}"
                        .into(),
                )
            })?;
        let (regions_part, types_part, ext) = (&caps[1], &caps[2], &caps[3]);

        let app = ProxyApp::from_extension(ext).ok_or_else(|| {
            ServerError::BadRequest(format!(
                "unsupported extension: {ext}. Supported: sgmodule, lnplugin, conf, stoverride"
            ))
        })?;
        let endpoint = EndpointKind::parse(query.endpoint.as_deref())?;
        let chunk_size_mb = parse_chunk_size(query.chunk.as_deref())?;

        let regions = regions_part
            .split('-')
            .map(|r| {
                r.parse::<Server>().map_err(|_| {
                    ServerError::BadRequest(format!(
                        "unsupported region: {r}. Supported: jp, en, tw, kr, cn"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut data_types = types_part
            .split('-')
            .map(|t| {
                t.parse::<UploadDataType>().map_err(|_| {
                    ServerError::BadRequest(format!(
                        "unsupported data type: {t}. Supported: suite, mysekai, mysekai_force, mysekai_birthday_party"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if data_types.contains(&UploadDataType::MysekaiForce) {
            data_types.retain(|t| *t != UploadDataType::Mysekai);
        }

        let mode = match query.mode.as_deref().unwrap_or("proxy") {
            "proxy" => UploadMode::Proxy,
            "script" if !app.supports_scripts() => {
                return Err(ServerError::BadRequest(
                    "Quantumult X does not support script upload mode. Use proxy mode instead.".into(),
                ))
            }
            "script" => UploadMode::Script,
            other => {
                return Err(ServerError::BadRequest(format!(
                    "unsupported mode: {other}. Supported: proxy, script"
                )))
            }
        };

        Ok(Self {
            upload_code: upload_code.to_string(),
            regions,
            data_types,
            app,
            mode,
            chunk_size_mb,
            endpoint,
        })
    }

    /// `{regions}-haruki-toolbox-{datatypes}.{ext}`
    pub fn file_name(&self) -> String {
        let regions: Vec<_> = self.regions.iter().map(Server::as_str).collect();
        let types: Vec<_> = self.data_types.iter().map(UploadDataType::as_str).collect();
        format!(
            "{}-haruki-toolbox-{}.{}",
            regions.join("-"),
            types.join("-"),
            self.app.extension()
        )
    }

    /// CN combined with any mysekai variant needs the user's permission.
    pub fn needs_cn_mysekai(&self) -> bool {
        self.regions.contains(&Server::Cn) && self.data_types.iter().any(|t| t.is_mysekai_family())
    }
}

// ─── Handlers ───

fn text_response(content_type: &'static str, body: String) -> Response {
    let mut resp = body.into_response();
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

/// `GET /ios/module/:upload_code/:file_name`
pub async fn module_handler(
    State(state): State<AppState>,
    Path((upload_code, file_name)): Path<(String, String)>,
    Query(query): Query<ModuleQuery>,
) -> Result<Response, ServerError> {
    let user = {
        let db = state.db.lock().await;
        auth::upload_code_owner(&db, &upload_code)?
    };
    let req = ModuleRequest::parse(&upload_code, &file_name, &query)?;
    if req.needs_cn_mysekai() && !user.allow_cn_mysekai {
        return Err(ServerError::Forbidden(
            "You are not allowed to use CN mysekai function".into(),
        ));
    }

    let ios = &state.config.ios;
    let endpoint = ios.endpoint(req.endpoint == EndpointKind::Cdn);
    let rule_set = rules::rule_set(&req, endpoint, &state.config.sekai_client);
    let meta = ModuleMeta {
        author: &ios.module_author,
        homepage: &ios.homepage,
        date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
    };
    let body = generator::render(req.app, &rule_set, &meta)
        .map_err(|e| ServerError::Internal(format!("module rendering failed: {e}")))?;
    info!(user = %user.id, file = %req.file_name(), "Generated iOS module");

    let mut resp = text_response(req.app.content_type(), body);
    if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", req.file_name())) {
        resp.headers_mut().insert(CONTENT_DISPOSITION, v);
    }
    Ok(resp)
}

#[derive(Debug, Default, Deserialize)]
pub struct ScriptQuery {
    pub chunk: Option<String>,
    pub endpoint: Option<String>,
}

/// `GET /ios/script/:upload_code/haruki-toolbox.js`
pub async fn script_handler(
    State(state): State<AppState>,
    Path(upload_code): Path<String>,
    Query(query): Query<ScriptQuery>,
) -> Result<Response, ServerError> {
    {
        let db = state.db.lock().await;
        auth::upload_code_owner(&db, &upload_code)?;
    }
    let chunk_size_mb = parse_chunk_size(query.chunk.as_deref())?;
    let endpoint = EndpointKind::parse(query.endpoint.as_deref())?;
    let base = state.config.ios.endpoint(endpoint == EndpointKind::Cdn);
    let generated_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let body = script::render_script(base, &upload_code, chunk_size_mb, &generated_at);
    Ok(text_response("application/javascript; charset=utf-8", body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(mode: Option<&str>, endpoint: Option<&str>, chunk: Option<&str>) -> ModuleQuery {
        ModuleQuery {
            mode: mode.map(Into::into),
            endpoint: endpoint.map(Into::into),
            chunk: chunk.map(Into::into),
        }
    }

    #[test]
    fn parses_file_name_and_defaults() {
        let req = ModuleRequest::parse(
            "code",
            "jp-tw-haruki-toolbox-suite-mysekai_birthday_party.sgmodule",
            &ModuleQuery::default(),
        )
        .unwrap();
        assert_eq!(req.regions, [Server::Jp, Server::Tw]);
        assert_eq!(
            req.data_types,
            [UploadDataType::Suite, UploadDataType::MysekaiBirthdayParty]
        );
        assert_eq!(req.app, ProxyApp::Surge);
        assert_eq!(req.mode, UploadMode::Proxy);
        assert_eq!(req.endpoint, EndpointKind::Direct);
        assert_eq!(req.chunk_size_mb, 1);
        assert_eq!(req.file_name(), "jp-tw-haruki-toolbox-suite-mysekai_birthday_party.sgmodule");
    }

    #[test]
    fn mysekai_force_supersedes_mysekai() {
        let req = ModuleRequest::parse(
            "code",
            "jp-haruki-toolbox-mysekai-suite-mysekai_force.lnplugin",
            &query(Some("script"), Some("cdn"), Some("4")),
        )
        .unwrap();
        assert_eq!(req.data_types, [UploadDataType::Suite, UploadDataType::MysekaiForce]);
        assert_eq!(req.mode, UploadMode::Script);
        assert_eq!(req.endpoint, EndpointKind::Cdn);
        assert_eq!(req.chunk_size_mb, 4);
    }

    #[test]
    fn quantumult_x_rejects_script_mode() {
        let err = ModuleRequest::parse(
            "code",
            "jp-haruki-toolbox-suite.conf",
            &query(Some("script"), None, None),
        )
        .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
        assert!(ModuleRequest::parse("code", "jp-haruki-toolbox-suite.conf", &ModuleQuery::default()).is_ok());
    }

    #[test]
    fn rejects_bad_inputs() {
        let bad = [
            ("xx-haruki-toolbox-suite.sgmodule", ModuleQuery::default()),
            ("jp-haruki-toolbox-nope.sgmodule", ModuleQuery::default()),
            ("jp-haruki-toolbox-suite.exe", ModuleQuery::default()),
            ("not-a-module", ModuleQuery::default()),
            ("jp-haruki-toolbox-suite.sgmodule", query(None, None, Some("11"))),
            ("jp-haruki-toolbox-suite.sgmodule", query(None, None, Some("0"))),
            ("jp-haruki-toolbox-suite.sgmodule", query(None, Some("edge"), None)),
            ("jp-haruki-toolbox-suite.sgmodule", query(Some("push"), None, None)),
        ];
        for (name, q) in bad {
            assert!(
                matches!(ModuleRequest::parse("code", name, &q), Err(ServerError::BadRequest(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn cn_mysekai_needs_permission() {
        let req = ModuleRequest::parse("c", "cn-haruki-toolbox-mysekai_force.stoverride", &ModuleQuery::default())
            .unwrap();
        assert!(req.needs_cn_mysekai());
        let req = ModuleRequest::parse("c", "cn-jp-haruki-toolbox-suite.stoverride", &ModuleQuery::default())
            .unwrap();
        assert!(!req.needs_cn_mysekai());
    }
}
