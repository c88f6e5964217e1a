//! Minimal HS256 JSON Web Tokens.
//!
//! Used for inherit verify tokens sent to the game, session tokens, and
//! webhook management tokens. Only the `HS256` algorithm is accepted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;
use sha2::Sha256;

use crate::error::TokenError;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Signs `claims` with `secret`.
pub fn sign<T: Serialize>(claims: &T, secret: &[u8]) -> Result<String, TokenError> {
    let header = URL_SAFE_NO_PAD.encode(HEADER);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{header}.{payload}");
    let signature = URL_SAFE_NO_PAD.encode(mac(secret, signing_input.as_bytes()));
    Ok(format!("{signing_input}.{signature}"))
}

/// Verifies signature and, when an `exp` claim is present, expiry against
/// `now_unix`. Returns the decoded claims.
pub fn verify<T: DeserializeOwned>(
    token: &str,
    secret: &[u8],
    now_unix: i64,
) -> Result<T, TokenError> {
    let mut parts = token.trim().split('.');
    let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| TokenError::Malformed)?;
    let header: Json = serde_json::from_slice(&header_bytes)?;
    match header.get("alg").and_then(Json::as_str) {
        Some("HS256") => {}
        Some(other) => return Err(TokenError::UnsupportedAlgorithm(other.to_string())),
        None => return Err(TokenError::Malformed),
    }

    let signature = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| TokenError::Malformed)?;
    let mut verifier =
        HmacSha256::new_from_slice(secret).map_err(|_| TokenError::BadSignature)?;
    verifier.update(header_b64.as_bytes());
    verifier.update(b".");
    verifier.update(payload_b64.as_bytes());
    verifier
        .verify_slice(&signature)
        .map_err(|_| TokenError::BadSignature)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| TokenError::Malformed)?;
    let raw: Json = serde_json::from_slice(&payload)?;
    if let Some(exp) = raw.get("exp").and_then(Json::as_i64) {
        if exp <= now_unix {
            return Err(TokenError::Expired);
        }
    }
    Ok(serde_json::from_value(raw)?)
}

fn mac(secret: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this never fails
    let mut m = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };
    m.update(data);
    m.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Claims {
        #[serde(rename = "inheritId")]
        inherit_id: String,
        password: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Expiring {
        sub: i64,
        exp: i64,
    }

    #[test]
    fn test_sign_verify() {
        let claims = Claims {
            inherit_id: "ABCDEFG".into(),
            password: "pw".into(),
        };
        let token = sign(&claims, b"secret").unwrap();
        assert_eq!(token.split('.').count(), 3);
        let back: Claims = verify(&token, b"secret", 0).unwrap();
        assert_eq!(back, claims);
    }

    #[test]
    fn test_known_header() {
        let token = sign(&serde_json::json!({}), b"k").unwrap();
        assert!(token.starts_with("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9."));
    }

    #[test]
    fn test_wrong_secret() {
        let token = sign(&serde_json::json!({"a": 1}), b"one").unwrap();
        assert!(matches!(
            verify::<Json>(&token, b"two", 0),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn test_expired() {
        let token = sign(&Expiring { sub: 1, exp: 100 }, b"k").unwrap();
        assert!(verify::<Expiring>(&token, b"k", 99).is_ok());
        assert!(matches!(
            verify::<Expiring>(&token, b"k", 100),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_malformed_and_alg() {
        assert!(matches!(verify::<Json>("a.b", b"k", 0), Err(TokenError::Malformed)));
        let none_header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let forged = format!("{none_header}.{}.", URL_SAFE_NO_PAD.encode("{}"));
        assert!(matches!(
            verify::<Json>(&forged, b"k", 0),
            Err(TokenError::UnsupportedAlgorithm(_))
        ));
    }
}
