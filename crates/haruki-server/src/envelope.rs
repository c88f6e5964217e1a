//! HarukiProxy outer envelope and client authentication.
//!
//! The first-party proxy client wraps the game payload in AES-256-GCM keyed
//! with `SHA256(unpack_key)`. The AAD binds the ciphertext to the route it
//! was posted to: `"{server}|{user_id}|{data_type}"`.

use std::cmp::Ordering;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use axum::http::HeaderMap;
use semver::Version;
use sha2::{Digest, Sha256};

use haruki_shared::{Server, UploadDataType};

use crate::auth::ct_eq;
use crate::config::HarukiProxyConfig;
use crate::error::ServerError;
use crate::patterns;

pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

pub const SECRET_HEADER: &str = "x-haruki-toolbox-secret";

pub fn envelope_aad(server: Server, user_id: i64, data_type: UploadDataType) -> String {
    format!("{server}|{user_id}|{data_type}")
}

fn cipher(unpack_key: &str) -> Aes256Gcm {
    let key = Sha256::digest(unpack_key.as_bytes());
    Aes256Gcm::new(&key)
}

/// Opens `nonce || ciphertext || tag`.
pub fn open(body: &[u8], unpack_key: &str, aad: &str) -> Result<Vec<u8>, ServerError> {
    if body.len() < NONCE_SIZE + TAG_SIZE {
        return Err(ServerError::BadRequest("request body too short".into()));
    }
    let (nonce, ciphertext) = body.split_at(NONCE_SIZE);
    cipher(unpack_key)
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| ServerError::BadRequest("failed to decrypt request body".into()))
}

/// Inverse of [`open`] with a random nonce.
#[cfg(test)]
pub fn seal(plain: &[u8], unpack_key: &str, aad: &str) -> Result<Vec<u8>, ServerError> {
    use rand::RngCore;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher(unpack_key)
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plain,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| ServerError::Internal("envelope encryption failed".into()))?;
    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Splits `Name/v1.2.3` into name and version.
pub fn parse_user_agent(ua: &str) -> Option<(&str, &str)> {
    let caps = patterns::user_agent()?.captures(ua.trim())?;
    let name = caps.get(1)?.as_str();
    let version = caps.get(2)?.as_str();
    Some((name, version))
}

/// Parses `1.2.3[-pre]`, tolerating a leading `v`.
pub fn parse_version(v: &str) -> Option<Version> {
    Version::parse(v.trim().trim_start_matches(['v', 'V'])).ok()
}

/// Secret and `User-Agent` gate in front of the HarukiProxy upload route.
/// Each check is skipped when its knob is not configured.
pub fn check_client(headers: &HeaderMap, config: &HarukiProxyConfig) -> Result<(), ServerError> {
    if !config.secret.is_empty() {
        let presented = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !ct_eq(presented, &config.secret) {
            return Err(ServerError::Unauthorized("Invalid HarukiProxy Secret".into()));
        }
    }

    if config.user_agent_name.is_empty() && config.min_version.is_empty() {
        return Ok(());
    }
    let ua = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let Some((name, version)) = parse_user_agent(ua) else {
        return Err(ServerError::Unauthorized("Invalid User-Agent format".into()));
    };
    if !config.user_agent_name.is_empty() && name != config.user_agent_name {
        return Err(ServerError::Unauthorized("Invalid User-Agent format".into()));
    }
    if !config.min_version.is_empty() {
        let (Some(client), Some(min)) = (parse_version(version), parse_version(&config.min_version))
        else {
            return Err(ServerError::Unauthorized("Invalid version string".into()));
        };
        if client.cmp_precedence(&min) == Ordering::Less {
            return Err(ServerError::Unauthorized("User-Agent version too old".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn proxy_config() -> HarukiProxyConfig {
        HarukiProxyConfig {
            user_agent_name: "Client".into(),
            min_version: "1.2.0".into(),
            secret: "secret".into(),
            unpack_key: "secret".into(),
        }
    }

    fn headers(secret: &str, ua: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(SECRET_HEADER, HeaderValue::from_str(secret).unwrap());
        h.insert("user-agent", HeaderValue::from_str(ua).unwrap());
        h
    }

    #[test]
    fn seal_then_open() {
        let aad = envelope_aad(Server::Jp, 12345, UploadDataType::Suite);
        assert_eq!(aad, "jp|12345|suite");
        let sealed = seal(b"inner", "secret", &aad).unwrap();
        assert_eq!(open(&sealed, "secret", &aad).unwrap(), b"inner");
    }

    #[test]
    fn tampered_aad_is_rejected() {
        let sealed = seal(b"inner", "secret", "jp|12345|suite").unwrap();
        let err = open(&sealed, "secret", "jp|12346|suite").unwrap_err();
        assert_eq!(err.to_string(), "failed to decrypt request body");
    }

    #[test]
    fn short_body_is_rejected_before_decrypt() {
        let err = open(&[0u8; NONCE_SIZE + TAG_SIZE - 1], "k", "a").unwrap_err();
        assert_eq!(err.to_string(), "request body too short");
    }

    #[test]
    fn user_agent_parsing() {
        assert_eq!(parse_user_agent("Client/v1.2.3"), Some(("Client", "1.2.3")));
        assert_eq!(parse_user_agent("My-App/V2.0.0-beta1"), Some(("My-App", "2.0.0-beta1")));
        assert!(parse_user_agent("Client/1.2.3").is_none());
        assert!(parse_user_agent("Client v1.2.3").is_none());
    }

    #[test]
    fn version_ordering() {
        let cmp = |a: &str, b: &str| parse_version(a).unwrap().cmp_precedence(&parse_version(b).unwrap());
        assert_eq!(cmp("1.2.3", "1.2.0"), Ordering::Greater);
        assert_eq!(cmp("1.10.0", "1.9.9"), Ordering::Greater);
        assert_eq!(cmp("1.2.0-rc1", "1.2.0"), Ordering::Less);
        assert_eq!(cmp("1.2.0", "v1.2.0"), Ordering::Equal);
        // numeric pre-release identifiers compare as numbers
        assert_eq!(cmp("1.2.0-2", "1.2.0-10"), Ordering::Less);
        assert!(parse_version("1.2").is_none());
    }

    #[test]
    fn client_checks() {
        let config = proxy_config();
        assert!(check_client(&headers("secret", "Client/v1.2.3"), &config).is_ok());

        let cases = [
            (headers("wrong", "Client/v1.2.3"), "Invalid HarukiProxy Secret"),
            (headers("secret", "garbage"), "Invalid User-Agent format"),
            (headers("secret", "Other/v9.0.0"), "Invalid User-Agent format"),
            (headers("secret", "Client/v1.1.9"), "User-Agent version too old"),
        ];
        for (h, msg) in cases {
            let err = check_client(&h, &config).unwrap_err();
            assert!(matches!(err, ServerError::Unauthorized(_)));
            assert_eq!(err.to_string(), msg);
        }

        let broken = HarukiProxyConfig {
            min_version: "latest".into(),
            ..proxy_config()
        };
        let err = check_client(&headers("secret", "Client/v1.2.3"), &broken).unwrap_err();
        assert_eq!(err.to_string(), "Invalid version string");
    }

    #[test]
    fn unconfigured_checks_are_skipped() {
        assert!(check_client(&HeaderMap::new(), &HarukiProxyConfig::default()).is_ok());
    }
}
