//! Literal regexes, compiled once on first use.

use std::sync::OnceLock;

use regex::Regex;

type Cell = OnceLock<Option<Regex>>;

fn compiled(cell: &'static Cell, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(%pattern, error = %e, "Failed to compile pattern");
            None
        }
    })
    .as_ref()
}

/// Whether `text` matches the pattern held by `cell`.
fn is_match(cell: &'static Cell, pattern: &str, text: &str) -> bool {
    compiled(cell, pattern).is_some_and(|re| re.is_match(text))
}

/// `Name/v1.2.3[-suffix]`
pub fn user_agent() -> Option<&'static Regex> {
    static CELL: Cell = OnceLock::new();
    compiled(&CELL, r"^([A-Za-z0-9\-]+)/[vV](\d+\.\d+\.\d+(?:-[a-zA-Z0-9]+)?)$")
}

/// Photo image path on jp/en: two sha256 hex digests.
pub fn is_hashed_image_path(path: &str) -> bool {
    static CELL: Cell = OnceLock::new();
    is_match(&CELL, r"^[a-f0-9]{64}/[a-f0-9]{64}$", path)
}

/// Photo image path on tw/kr/cn: `{user_id}_{uuid}`.
pub fn user_image_path() -> Option<&'static Regex> {
    static CELL: Cell = OnceLock::new();
    compiled(&CELL, r"^(\d+)_[0-9a-fA-F-]{36}$")
}

/// `{regions}-haruki-toolbox-{datatypes}.{ext}`
pub fn module_file_name() -> Option<&'static Regex> {
    static CELL: Cell = OnceLock::new();
    compiled(&CELL, r"^([a-z-]+)-haruki-toolbox-([a-z_-]+)\.(\w+)$")
}

/// Game API paths the iOS surfaces understand, relative to `/api`.
pub fn suite_path() -> Option<&'static Regex> {
    static CELL: Cell = OnceLock::new();
    compiled(&CELL, r"^/?suite/user/(\d+)/?$")
}

pub fn mysekai_path() -> Option<&'static Regex> {
    static CELL: Cell = OnceLock::new();
    compiled(&CELL, r"^/?user/(\d+)/mysekai/?$")
}

pub fn birthday_party_path() -> Option<&'static Regex> {
    static CELL: Cell = OnceLock::new();
    compiled(&CELL, r"^/?user/(\d+)/mysekai/birthday-party/(\d+)/delivery/?$")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_patterns_compile() {
        assert!(user_agent().is_some());
        assert!(user_image_path().is_some());
        assert!(module_file_name().is_some());
        assert!(suite_path().is_some());
        assert!(mysekai_path().is_some());
        assert!(birthday_party_path().is_some());
    }

    #[test]
    fn image_paths() {
        let h = "a".repeat(64);
        assert!(is_hashed_image_path(&format!("{h}/{h}")));
        assert!(!is_hashed_image_path(&format!("{h}/{}", "A".repeat(64))));

        let re = user_image_path().unwrap();
        let caps = re
            .captures("12345_0f8fad5b-d9cb-469f-a165-70867728950e")
            .unwrap();
        assert_eq!(&caps[1], "12345");
        assert!(!re.is_match("12345_short"));
    }

    #[test]
    fn api_paths() {
        assert_eq!(&suite_path().unwrap().captures("suite/user/42").unwrap()[1], "42");
        assert!(mysekai_path().unwrap().is_match("/user/42/mysekai"));
        let caps = birthday_party_path()
            .unwrap()
            .captures("user/42/mysekai/birthday-party/9/delivery")
            .unwrap();
        assert_eq!((&caps[1], &caps[2]), ("42", "9"));
    }
}
