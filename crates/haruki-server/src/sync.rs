//! Third-party data sinks.
//!
//! Each upload is offered to up to four globally configured sinks, gated by
//! the binding's privacy flags. Posts are fire-and-forget: failures are
//! logged and never retried.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use tracing::{info, warn};

use haruki_shared::{DocumentKind, Server, UploadDataType};
use haruki_store::SinkFlags;

use crate::config::{SinkConfig, ThirdPartyConfig};

/// Replaces `{user_id}`, `{server}` and `{data_type}`.
pub fn expand_url_template(template: &str, server: Server, data_type: UploadDataType, user_id: i64) -> String {
    template
        .replace("{user_id}", &user_id.to_string())
        .replace("{server}", server.as_str())
        .replace("{data_type}", data_type.as_str())
}

pub fn backend_user_agent() -> String {
    format!("Haruki-Toolbox-Backend/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Haruki8823,
    Sakura,
    Resona,
    Luna,
}

impl Sink {
    pub fn name(&self) -> &'static str {
        match self {
            Sink::Haruki8823 => "8823",
            Sink::Sakura => "sakura",
            Sink::Resona => "resona",
            Sink::Luna => "luna",
        }
    }

    /// Sinks that take a document kind, in dispatch order.
    pub fn for_kind(kind: DocumentKind) -> &'static [Sink] {
        match kind {
            DocumentKind::Suite => &[Sink::Haruki8823, Sink::Sakura, Sink::Resona, Sink::Luna],
            DocumentKind::Mysekai | DocumentKind::BirthdayParty => {
                &[Sink::Haruki8823, Sink::Resona, Sink::Luna]
            }
        }
    }

    fn allowed(&self, flags: SinkFlags) -> bool {
        match self {
            Sink::Haruki8823 => flags.haruki_8823,
            Sink::Sakura => flags.sakura,
            Sink::Resona => flags.resona,
            Sink::Luna => flags.luna,
        }
    }

    fn config<'a>(&self, config: &'a ThirdPartyConfig) -> &'a SinkConfig {
        match self {
            Sink::Haruki8823 => &config.haruki_8823,
            Sink::Sakura => &config.sakura,
            Sink::Resona => &config.resona,
            Sink::Luna => &config.luna,
        }
    }
}

/// One outbound post, fully resolved.
#[derive(Debug, Clone)]
pub struct SinkRequest {
    pub sink: Sink,
    pub url: String,
    pub headers: HeaderMap,
}

/// Resolves the posts an upload triggers. Disabled sinks, sinks without a
/// URL for the kind, and sinks the binding opted out of are skipped.
pub fn sink_requests(
    config: &ThirdPartyConfig,
    flags: SinkFlags,
    server: Server,
    data_type: UploadDataType,
    user_id: i64,
) -> Vec<SinkRequest> {
    let data_type = data_type.canonical();
    let kind = data_type.document_kind();
    Sink::for_kind(kind)
        .iter()
        .filter(|sink| sink.allowed(flags))
        .filter_map(|sink| {
            let sink_config = sink.config(config);
            let template = sink_config.url_for(kind)?;
            let url = expand_url_template(template, server, data_type, user_id);
            let headers = sink_headers(*sink, &sink_config.secret, server, data_type, user_id);
            Some(SinkRequest {
                sink: *sink,
                url,
                headers,
            })
        })
        .collect()
}

fn sink_headers(
    sink: Sink,
    secret: &str,
    server: Server,
    data_type: UploadDataType,
    user_id: i64,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    headers.insert(
        HeaderName::from_static("x-haruki-upload-data-format"),
        HeaderValue::from_static("raw"),
    );
    if let Ok(v) = HeaderValue::from_str(&backend_user_agent()) {
        headers.insert(USER_AGENT, v);
    }
    if !secret.is_empty() {
        match HeaderValue::from_str(&format!("Bearer {secret}")) {
            Ok(v) => {
                headers.insert(AUTHORIZATION, v);
            }
            Err(_) => warn!(sink = sink.name(), "Sink secret is not a valid header value"),
        }
    }
    if sink == Sink::Haruki8823 {
        headers.insert(
            HeaderName::from_static("x-server-region"),
            HeaderValue::from_static(server.as_str()),
        );
        headers.insert(
            HeaderName::from_static("x-upload-type"),
            HeaderValue::from_static(data_type.as_str()),
        );
        headers.insert(HeaderName::from_static("x-user-id"), HeaderValue::from(user_id));
    }
    headers
}

#[derive(Clone)]
pub struct ThirdPartySyncer {
    http: reqwest::Client,
    config: Arc<ThirdPartyConfig>,
}

impl ThirdPartySyncer {
    pub fn new(http: reqwest::Client, config: Arc<ThirdPartyConfig>) -> Self {
        Self { http, config }
    }

    /// Posts `body` to every eligible sink in parallel and returns at once.
    pub fn dispatch(
        &self,
        flags: SinkFlags,
        server: Server,
        data_type: UploadDataType,
        user_id: i64,
        body: Bytes,
    ) {
        for request in sink_requests(&self.config, flags, server, data_type, user_id) {
            let http = self.http.clone();
            let body = body.clone();
            tokio::spawn(async move {
                let sink = request.sink.name();
                let result = http
                    .post(&request.url)
                    .headers(request.headers)
                    .body(body)
                    .send()
                    .await;
                match result {
                    Ok(resp) if resp.status().is_success() => {
                        info!(%sink, %server, user_id, "Synced data to third party");
                    }
                    Ok(resp) => {
                        warn!(%sink, %server, user_id, status = %resp.status(), "Third-party sync rejected");
                    }
                    Err(e) => {
                        warn!(%sink, %server, user_id, error = %e, "Third-party sync failed");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(url_suite: &str, url_mysekai: &str) -> SinkConfig {
        SinkConfig {
            enabled: true,
            suite_url: url_suite.into(),
            mysekai_url: url_mysekai.into(),
            secret: "s3cret".into(),
        }
    }

    fn config() -> ThirdPartyConfig {
        ThirdPartyConfig {
            haruki_8823: sink("https://a.test/{server}/{user_id}", "https://a.test/m/{data_type}"),
            sakura: sink("https://sakura.test/{user_id}", ""),
            resona: sink("https://resona.test/suite", "https://resona.test/mysekai"),
            luna: SinkConfig::default(),
        }
    }

    fn all() -> SinkFlags {
        SinkFlags {
            sakura: true,
            haruki_8823: true,
            resona: true,
            luna: true,
        }
    }

    #[test]
    fn template_expansion() {
        assert_eq!(
            expand_url_template("https://x/{server}/{data_type}/{user_id}", Server::Kr, UploadDataType::Suite, 5),
            "https://x/kr/suite/5"
        );
    }

    #[test]
    fn suite_goes_to_enabled_sinks() {
        let reqs = sink_requests(&config(), all(), Server::Jp, UploadDataType::Suite, 42);
        let names: Vec<_> = reqs.iter().map(|r| r.sink.name()).collect();
        assert_eq!(names, ["8823", "sakura", "resona"]);
        assert_eq!(reqs[0].url, "https://a.test/jp/42");
        assert_eq!(reqs[0].headers["x-user-id"], "42");
        assert_eq!(reqs[0].headers["x-server-region"], "jp");
        assert_eq!(reqs[1].headers[AUTHORIZATION], "Bearer s3cret");
        assert_eq!(reqs[1].headers["x-haruki-upload-data-format"], "raw");
        assert!(reqs[1].headers.get("x-user-id").is_none());
    }

    #[test]
    fn mysekai_skips_sakura_and_respects_flags() {
        let flags = SinkFlags {
            resona: false,
            ..all()
        };
        let reqs = sink_requests(&config(), flags, Server::Tw, UploadDataType::MysekaiForce, 1);
        let names: Vec<_> = reqs.iter().map(|r| r.sink.name()).collect();
        assert_eq!(names, ["8823"]);
        assert_eq!(reqs[0].url, "https://a.test/m/mysekai");
        assert_eq!(reqs[0].headers["x-upload-type"], "mysekai");
    }

    #[test]
    fn no_flags_no_requests() {
        assert!(sink_requests(&config(), SinkFlags::default(), Server::Jp, UploadDataType::Suite, 1).is_empty());
    }
}
