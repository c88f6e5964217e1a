//! Server configuration loaded from a YAML file.
//!
//! Every section has defaults so a partial file is accepted. The file itself
//! must exist and parse; a broken configuration stops the process before any
//! traffic is served.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use haruki_client::InheritSettings;
use haruki_shared::{CodecError, DocumentKind, SekaiCodec, Server};

/// Default configuration file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "haruki-suite-configs.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub sekai_client: SekaiClientConfig,
    pub third_party: ThirdPartyConfig,
    pub haruki_proxy: HarukiProxyConfig,
    pub ios: IosConfig,
    pub user_system: UserSystemConfig,
}

impl Config {
    /// The config path: `HARUKI_CONFIG` when set, otherwise
    /// [`DEFAULT_CONFIG_PATH`].
    pub fn path_from_env() -> PathBuf {
        std::env::var("HARUKI_CONFIG")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }
}

// ---------------------------------------------------------------------------
// backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Default: `0.0.0.0`
    pub host: String,

    /// Default: `8080`
    pub port: u16,

    /// Extra `EnvFilter` directive applied when `RUST_LOG` is unset.
    /// Default: none.
    pub log_level: Option<String>,

    /// Request body limit in MiB.
    /// Default: `20`
    pub body_limit_mb: usize,

    /// Suite fields the public read API may return.
    pub public_api_allowed_keys: Vec<String>,

    /// JSON file describing positional compact fields.
    /// Default: none (no restoration on persist).
    pub compact_schema_path: Option<PathBuf>,

    /// SQLite database file.
    /// Default: `./data/haruki.db`
    pub database_path: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: None,
            body_limit_mb: 20,
            public_api_allowed_keys: Vec::new(),
            compact_schema_path: None,
            database_path: PathBuf::from("./data/haruki.db"),
        }
    }
}

impl BackendConfig {
    /// Socket address to bind. An unparsable host falls back to `0.0.0.0`.
    pub fn http_addr(&self) -> SocketAddr {
        match format!("{}:{}", self.host, self.port).parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(_) => {
                tracing::warn!(host = %self.host, "Invalid backend.host, using 0.0.0.0");
                SocketAddr::from(([0, 0, 0, 0], self.port))
            }
        }
    }

    pub fn body_limit_bytes(&self) -> usize {
        if self.body_limit_mb == 0 {
            tracing::warn!("backend.body_limit_mb is 0, using 20");
            return haruki_shared::constants::DEFAULT_BODY_LIMIT;
        }
        self.body_limit_mb * 1024 * 1024
    }
}

// ---------------------------------------------------------------------------
// sekai_client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SekaiClientConfig {
    pub jp_server_api_host: String,
    pub en_server_api_host: String,
    pub tw_server_api_host: String,
    pub kr_server_api_host: String,
    pub cn_server_api_host: String,
    pub tw_server_api_host2: String,
    pub kr_server_api_host2: String,
    pub cn_server_api_host2: String,

    /// Hex, 16 bytes each.
    pub en_server_aes_key: String,
    pub en_server_aes_iv: String,
    pub other_server_aes_key: String,
    pub other_server_aes_iv: String,

    /// HS256 secrets for the inherit verify token.
    pub jp_server_inherit_token: String,
    pub en_server_inherit_token: String,

    /// JSON manifests carrying the current app/asset/data versions.
    pub jp_server_app_version_url: String,
    pub en_server_app_version_url: String,

    pub jp_server_inherit_client_headers: IndexMap<String, String>,
    pub en_server_inherit_client_headers: IndexMap<String, String>,

    /// Suite fields blanked to `[]` before persisting.
    pub suite_remove_keys: Vec<String>,

    /// Outbound proxy for game API traffic.
    pub proxy: Option<String>,

    /// Account-existence check service.
    pub sekai_api_endpoint: String,
    pub sekai_api_token: String,
}

impl SekaiClientConfig {
    /// Primary API host of `server`.
    pub fn api_host(&self, server: Server) -> &str {
        match server {
            Server::Jp => &self.jp_server_api_host,
            Server::En => &self.en_server_api_host,
            Server::Tw => &self.tw_server_api_host,
            Server::Kr => &self.kr_server_api_host,
            Server::Cn => &self.cn_server_api_host,
        }
    }

    /// Every configured API host of `server`, primary first.
    pub fn api_hosts(&self, server: Server) -> Vec<&str> {
        let secondary = match server {
            Server::Tw => Some(self.tw_server_api_host2.as_str()),
            Server::Kr => Some(self.kr_server_api_host2.as_str()),
            Server::Cn => Some(self.cn_server_api_host2.as_str()),
            Server::Jp | Server::En => None,
        };
        std::iter::once(self.api_host(server))
            .chain(secondary)
            .filter(|h| !h.is_empty())
            .collect()
    }

    pub fn primary_hosts(&self) -> HashMap<Server, String> {
        Server::ALL
            .iter()
            .map(|s| (*s, self.api_host(*s).to_string()))
            .filter(|(_, h)| !h.is_empty())
            .collect()
    }

    pub fn codec(&self) -> Result<SekaiCodec, CodecError> {
        SekaiCodec::from_hex(
            &self.en_server_aes_key,
            &self.en_server_aes_iv,
            &self.other_server_aes_key,
            &self.other_server_aes_iv,
        )
    }

    /// Impersonation settings; `None` for servers without inherit support.
    pub fn inherit_settings(&self, server: Server) -> Option<InheritSettings> {
        let (version_url, headers, secret) = match server {
            Server::Jp => (
                &self.jp_server_app_version_url,
                &self.jp_server_inherit_client_headers,
                &self.jp_server_inherit_token,
            ),
            Server::En => (
                &self.en_server_app_version_url,
                &self.en_server_inherit_client_headers,
                &self.en_server_inherit_token,
            ),
            _ => return None,
        };
        Some(InheritSettings {
            api_base: format!("https://{}/api", self.api_host(server)),
            version_url: version_url.clone(),
            headers: headers.clone(),
            jwt_secret: secret.clone(),
            proxy: self.proxy.clone().filter(|p| !p.is_empty()),
        })
    }
}

// ---------------------------------------------------------------------------
// third_party
// ---------------------------------------------------------------------------

/// One third-party data sink.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub enabled: bool,
    /// May contain `{server}`, `{data_type}` and `{user_id}`.
    pub suite_url: String,
    pub mysekai_url: String,
    pub secret: String,
}

impl SinkConfig {
    /// Target URL template for a document kind, if this sink takes it.
    pub fn url_for(&self, kind: DocumentKind) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        let url = match kind {
            DocumentKind::Suite => &self.suite_url,
            DocumentKind::Mysekai | DocumentKind::BirthdayParty => &self.mysekai_url,
        };
        (!url.is_empty()).then_some(url.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ThirdPartyConfig {
    pub haruki_8823: SinkConfig,
    pub sakura: SinkConfig,
    pub resona: SinkConfig,
    pub luna: SinkConfig,
}

// ---------------------------------------------------------------------------
// haruki_proxy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarukiProxyConfig {
    /// Expected `User-Agent` product name.
    pub user_agent_name: String,
    /// Lowest accepted client version, e.g. `1.2.0`.
    pub min_version: String,
    /// Expected `X-Haruki-Toolbox-Secret`.
    pub secret: String,
    /// SHA-256 of this string keys the AES-GCM envelope.
    pub unpack_key: String,
}

// ---------------------------------------------------------------------------
// ios
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IosConfig {
    /// Public base URL of this backend.
    pub direct_endpoint: String,
    /// CDN-fronted base URL. Falls back to `direct_endpoint` when empty.
    pub cdn_endpoint: String,
    pub module_author: String,
    pub homepage: String,
}

impl Default for IosConfig {
    fn default() -> Self {
        Self {
            direct_endpoint: "http://127.0.0.1:8080".to_string(),
            cdn_endpoint: String::new(),
            module_author: "Haruki Dev Team".to_string(),
            homepage: String::new(),
        }
    }
}

impl IosConfig {
    pub fn endpoint(&self, cdn: bool) -> &str {
        let base = if cdn && !self.cdn_endpoint.is_empty() {
            &self.cdn_endpoint
        } else {
            &self.direct_endpoint
        };
        base.trim_end_matches('/')
    }
}

// ---------------------------------------------------------------------------
// user_system
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserSystemConfig {
    /// HS256 key of session tokens issued by the account service.
    pub session_sign_key: String,
    /// Exact `Authorization` value required by the private read API.
    pub private_api_secret: String,
    /// Keyword the private API caller's `User-Agent` must contain.
    pub private_api_user_agent: String,
    /// HS256 key of webhook management tokens.
    pub webhook_jwt_secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
backend:
  port: 9000
  public_api_allowed_keys: [userCards, userDecks]
sekai_client:
  jp_server_api_host: jp.example
  tw_server_api_host: tw1.example
  tw_server_api_host2: tw2.example
  en_server_aes_key: "00112233445566778899aabbccddeeff"
  en_server_aes_iv: "ffeeddccbbaa99887766554433221100"
  other_server_aes_key: "0f0e0d0c0b0a09080706050403020100"
  other_server_aes_iv: "000102030405060708090a0b0c0d0e0f"
  jp_server_inherit_client_headers:
    User-Agent: game/1
    X-Platform: iOS
third_party:
  luna:
    enabled: true
    suite_url: "https://luna.example/{server}/{user_id}"
"#;

    #[test]
    fn defaults_fill_missing_sections() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.backend.port, 9000);
        assert_eq!(config.backend.host, "0.0.0.0");
        assert_eq!(config.backend.body_limit_bytes(), 20 * 1024 * 1024);
        assert_eq!(config.backend.public_api_allowed_keys.len(), 2);
        assert_eq!(config.ios.module_author, "Haruki Dev Team");
        assert!(config.haruki_proxy.secret.is_empty());
    }

    #[test]
    fn http_addr_falls_back_on_bad_host() {
        let mut backend = BackendConfig::default();
        backend.host = "not a host".into();
        assert_eq!(backend.http_addr(), SocketAddr::from(([0, 0, 0, 0], 8080)));
    }

    #[test]
    fn host_tables() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        let sc = &config.sekai_client;
        assert_eq!(sc.api_hosts(Server::Tw), vec!["tw1.example", "tw2.example"]);
        assert_eq!(sc.api_hosts(Server::Jp), vec!["jp.example"]);
        assert!(sc.api_hosts(Server::Kr).is_empty());
        assert!(!sc.primary_hosts().contains_key(&Server::En));
        assert!(sc.codec().is_ok());
    }

    #[test]
    fn inherit_settings_only_for_jp_en() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        let jp = config.sekai_client.inherit_settings(Server::Jp).unwrap();
        assert_eq!(jp.api_base, "https://jp.example/api");
        assert_eq!(jp.headers.keys().collect::<Vec<_>>(), ["User-Agent", "X-Platform"]);
        assert!(config.sekai_client.inherit_settings(Server::Cn).is_none());
    }

    #[test]
    fn sink_urls_respect_enabled() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        let tp = &config.third_party;
        assert!(tp.luna.url_for(DocumentKind::Suite).is_some());
        assert!(tp.luna.url_for(DocumentKind::Mysekai).is_none());
        assert!(tp.sakura.url_for(DocumentKind::Suite).is_none());
    }

    #[test]
    fn ios_endpoint_falls_back_to_direct() {
        let ios = IosConfig {
            direct_endpoint: "https://api.example/".into(),
            ..Default::default()
        };
        assert_eq!(ios.endpoint(true), "https://api.example");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
