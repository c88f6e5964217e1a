//! Transparent forwarder used by the iOS proxy surface: the device talks to
//! us, we talk to the game API with the device's own headers.

use std::collections::HashMap;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use reqwest::{Method, StatusCode};
use tracing::debug;

use haruki_shared::Server;

use crate::error::{ClientError, Result};

/// Request headers passed through to the game API.
pub const ALLOWED_HEADERS: [&str; 19] = [
    "user-agent",
    "cookie",
    "x-forwarded-for",
    "accept-language",
    "accept",
    "accept-encoding",
    "x-devicemodel",
    "x-app-hash",
    "x-operatingsystem",
    "x-kc",
    "x-unity-version",
    "x-app-version",
    "x-platform",
    "x-session-token",
    "x-asset-version",
    "x-request-id",
    "x-data-version",
    "content-type",
    "x-install-id",
];

/// Upstream response, returned verbatim to the device.
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct GameProxy {
    http: reqwest::Client,
    hosts: HashMap<Server, String>,
}

impl GameProxy {
    /// `hosts` maps each server to its primary API host name.
    pub fn new(http: reqwest::Client, hosts: HashMap<Server, String>) -> Self {
        Self { http, hosts }
    }

    pub fn host(&self, server: Server) -> Result<&str> {
        self.hosts
            .get(&server)
            .map(String::as_str)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ClientError::UnsupportedServer(server.to_string()))
    }

    /// Forwards `path_and_query` (relative to `/api`) to the game.
    pub async fn forward(
        &self,
        server: Server,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ProxiedResponse> {
        let host = self.host(server)?;
        let url = format!("https://{host}/api/{}", path_and_query.trim_start_matches('/'));
        debug!(%server, %url, "forwarding game API call");

        let mut req = self
            .http
            .request(method.clone(), &url)
            .headers(filter_headers(headers, host));
        if method != Method::GET && method != Method::HEAD {
            req = req.body(body);
        }
        let resp = req.send().await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;
        Ok(ProxiedResponse {
            status,
            headers,
            body,
        })
    }
}

/// Keeps only [`ALLOWED_HEADERS`] and pins `Host` to the game host.
pub fn filter_headers(headers: &HeaderMap, host: &str) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if ALLOWED_HEADERS.contains(&name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    if let Ok(v) = HeaderValue::from_str(host) {
        out.insert(HOST, v);
    }
    out
}

/// Whether a response header may be relayed back to the device. Hop-by-hop
/// and length headers are recomputed by our own HTTP stack.
pub fn is_relayable_response_header(name: &HeaderName) -> bool {
    !matches!(
        name.as_str(),
        "connection" | "transfer-encoding" | "content-length" | "keep-alive" | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_headers() {
        let mut h = HeaderMap::new();
        h.insert("x-session-token", HeaderValue::from_static("s"));
        h.insert("X-Unity-Version", HeaderValue::from_static("2022"));
        h.insert("authorization", HeaderValue::from_static("Bearer x"));
        h.insert(HOST, HeaderValue::from_static("proxy.example"));

        let out = filter_headers(&h, "game.example");
        assert_eq!(out.get("x-session-token").unwrap(), "s");
        assert_eq!(out.get("x-unity-version").unwrap(), "2022");
        assert!(out.get("authorization").is_none());
        assert_eq!(out.get(HOST).unwrap(), "game.example");
    }

    #[test]
    fn unknown_server_host() {
        let proxy = GameProxy::new(
            reqwest::Client::new(),
            HashMap::from([(Server::Jp, "jp.example".to_string())]),
        );
        assert_eq!(proxy.host(Server::Jp).unwrap(), "jp.example");
        assert!(proxy.host(Server::Cn).is_err());
    }

    #[test]
    fn hop_by_hop_not_relayed() {
        assert!(!is_relayable_response_header(&HeaderName::from_static("transfer-encoding")));
        assert!(is_relayable_response_header(&HeaderName::from_static("x-session-token")));
    }
}
