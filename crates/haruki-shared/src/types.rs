use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::HarukiError;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A regional game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Server {
    Jp,
    En,
    Tw,
    Kr,
    Cn,
}

impl Server {
    pub const ALL: [Server; 5] = [Server::Jp, Server::En, Server::Tw, Server::Kr, Server::Cn];

    pub fn as_str(&self) -> &'static str {
        match self {
            Server::Jp => "jp",
            Server::En => "en",
            Server::Tw => "tw",
            Server::Kr => "kr",
            Server::Cn => "cn",
        }
    }

    /// Only jp and en expose the account-inherit flow.
    pub fn supports_inherit(&self) -> bool {
        matches!(self, Server::Jp | Server::En)
    }

    /// Servers whose mysekai photo paths embed the owner's user id.
    pub fn embeds_user_in_image_path(&self) -> bool {
        matches!(self, Server::Tw | Server::Kr | Server::Cn)
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Server {
    type Err = HarukiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jp" => Ok(Server::Jp),
            "en" => Ok(Server::En),
            "tw" => Ok(Server::Tw),
            "kr" => Ok(Server::Kr),
            "cn" => Ok(Server::Cn),
            other => Err(HarukiError::UnknownVariant {
                kind: "server",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Upload data type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadDataType {
    Suite,
    Mysekai,
    /// Client-side rewrite forcing a full reload. Same payload as `Mysekai`.
    MysekaiForce,
    MysekaiBirthdayParty,
}

/// Which stored document a data type lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Suite,
    Mysekai,
    BirthdayParty,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Suite => "suite",
            DocumentKind::Mysekai => "mysekai",
            DocumentKind::BirthdayParty => "mysekai_birthday_party",
        }
    }
}

impl UploadDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadDataType::Suite => "suite",
            UploadDataType::Mysekai => "mysekai",
            UploadDataType::MysekaiForce => "mysekai_force",
            UploadDataType::MysekaiBirthdayParty => "mysekai_birthday_party",
        }
    }

    pub fn document_kind(&self) -> DocumentKind {
        match self {
            UploadDataType::Suite => DocumentKind::Suite,
            UploadDataType::Mysekai | UploadDataType::MysekaiForce => DocumentKind::Mysekai,
            UploadDataType::MysekaiBirthdayParty => DocumentKind::BirthdayParty,
        }
    }

    pub fn is_mysekai_family(&self) -> bool {
        !matches!(self, UploadDataType::Suite)
    }

    /// Collapses `mysekai_force` into `mysekai`; the ingestion pipeline and
    /// the read layer never distinguish them.
    pub fn canonical(self) -> Self {
        match self {
            UploadDataType::MysekaiForce => UploadDataType::Mysekai,
            other => other,
        }
    }
}

impl fmt::Display for UploadDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadDataType {
    type Err = HarukiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suite" => Ok(UploadDataType::Suite),
            "mysekai" => Ok(UploadDataType::Mysekai),
            "mysekai_force" => Ok(UploadDataType::MysekaiForce),
            // module filenames historically used the short hyphenated form
            "mysekai_birthday_party" | "mysekai-birthday" => {
                Ok(UploadDataType::MysekaiBirthdayParty)
            }
            other => Err(HarukiError::UnknownVariant {
                kind: "data_type",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Upload method / policy
// ---------------------------------------------------------------------------

/// How an upload reached the backend. Recorded per upload, never rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMethod {
    Manual,
    HarukiProxy,
    IosProxy,
    Inherit,
}

impl UploadMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadMethod::Manual => "manual",
            UploadMethod::HarukiProxy => "harukiproxy",
            UploadMethod::IosProxy => "iosproxy",
            UploadMethod::Inherit => "inherit",
        }
    }
}

impl fmt::Display for UploadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPolicy {
    Public,
    Private,
}

impl UploadPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadPolicy::Public => "public",
            UploadPolicy::Private => "private",
        }
    }
}

// ---------------------------------------------------------------------------
// User id extraction
// ---------------------------------------------------------------------------

/// Reads a game user id that may arrive as an integer, a float or a string.
///
/// Returns `None` for anything that is not a positive id.
pub fn user_id_from_json(value: &Json) -> Option<i64> {
    let id = match value {
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                i
            } else if let Some(u) = n.as_u64() {
                i64::try_from(u).ok()?
            } else {
                let f = n.as_f64()?;
                if f.fract() != 0.0 {
                    return None;
                }
                f as i64
            }
        }
        Json::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    (id > 0).then_some(id)
}

/// Reads `userGamedata.userId` from a decoded payload.
pub fn extract_user_id(payload: &serde_json::Map<String, Json>) -> Option<i64> {
    payload
        .get("userGamedata")
        .and_then(|g| g.get("userId"))
        .and_then(user_id_from_json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_round_trip() {
        for server in Server::ALL {
            assert_eq!(server.as_str().parse::<Server>().unwrap(), server);
        }
        assert!("us".parse::<Server>().is_err());
    }

    #[test]
    fn test_inherit_servers() {
        assert!(Server::Jp.supports_inherit());
        assert!(Server::En.supports_inherit());
        assert!(!Server::Cn.supports_inherit());
    }

    #[test]
    fn test_data_type_aliases() {
        assert_eq!(
            "mysekai-birthday".parse::<UploadDataType>().unwrap(),
            UploadDataType::MysekaiBirthdayParty
        );
        assert_eq!(
            UploadDataType::MysekaiForce.document_kind(),
            DocumentKind::Mysekai
        );
        assert_eq!(UploadDataType::MysekaiForce.canonical(), UploadDataType::Mysekai);
        assert!("friends".parse::<UploadDataType>().is_err());
    }

    #[test]
    fn test_user_id_variants() {
        assert_eq!(user_id_from_json(&json!(12345)), Some(12345));
        assert_eq!(user_id_from_json(&json!(12345.0)), Some(12345));
        assert_eq!(user_id_from_json(&json!("12345")), Some(12345));
        assert_eq!(user_id_from_json(&json!(u64::MAX)), None);
        assert_eq!(user_id_from_json(&json!(1.5)), None);
        assert_eq!(user_id_from_json(&json!("abc")), None);
        assert_eq!(user_id_from_json(&json!(0)), None);
        assert_eq!(user_id_from_json(&json!(null)), None);
    }

    #[test]
    fn test_extract_user_id() {
        let payload = json!({"userGamedata": {"userId": "777", "name": "A"}});
        assert_eq!(extract_user_id(payload.as_object().unwrap()), Some(777));

        let missing = json!({"userProfile": {}});
        assert_eq!(extract_user_id(missing.as_object().unwrap()), None);
    }
}
