//! The chunk upload script served to proxy apps.

const TEMPLATE: &str = include_str!("../../assets/haruki-toolbox.js");

/// Fills the script template. `endpoint` is the public base URL the device
/// should post chunks to.
pub fn render_script(endpoint: &str, upload_code: &str, chunk_size_mb: u32, generated_at: &str) -> String {
    let upload_url = format!("{endpoint}/ios/script/{upload_code}/upload");
    TEMPLATE
        .replace("{{UPLOAD_URL}}", &upload_url)
        .replace("{{CHUNK_SIZE}}", &chunk_size_mb.to_string())
        .replace("{{UPLOAD_CODE}}", upload_code)
        .replace("{{GENERATE_DATE}}", generated_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_filled() {
        let js = render_script("https://api.test", "abc123", 3, "2026-01-02 03:04:05");
        assert!(!js.contains("{{"));
        assert!(js.contains(r#"const UPLOAD_URL = "https://api.test/ios/script/abc123/upload";"#));
        assert!(js.contains(r#"const UPLOAD_CODE = "abc123";"#));
        assert!(js.contains("const CHUNK_SIZE = 3 * 1024 * 1024;"));
        assert!(js.contains("Generated at 2026-01-02 03:04:05"));
    }
}
