use std::time::Duration;

use crate::error::{ClientError, Result};

/// Builds a `reqwest` client with a per-call timeout and an optional
/// outbound proxy URL.
pub fn build_http_client(timeout: Duration, proxy: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(url) = proxy.filter(|p| !p.is_empty()) {
        let proxy = reqwest::Proxy::all(url)
            .map_err(|e| ClientError::Config(format!("invalid proxy url {url}: {e}")))?;
        builder = builder.proxy(proxy);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_and_without_proxy() {
        assert!(build_http_client(Duration::from_secs(1), None).is_ok());
        assert!(build_http_client(Duration::from_secs(1), Some("")).is_ok());
        assert!(build_http_client(Duration::from_secs(1), Some("http://127.0.0.1:8080")).is_ok());
        assert!(build_http_client(Duration::from_secs(1), Some("::not a url::")).is_err());
    }
}
