//! URL handling module for Ink-Crawler
//!
//! This module provides URL decomposition, completion of discovered links
//! against their page, percent-encoding, pattern matching, and the
//! deterministic URL hash used for row ids and cache keys.

mod matcher;

use crate::{UrlError, UrlResult};
use sha2::{Digest, Sha256};
use url::Url;

pub use matcher::UrlPattern;

/// Components of a page URL, exposed to plugins and the selector engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub href: String,
    /// Scheme, host and port, without a trailing slash (`https://a.com`)
    pub origin: String,
    pub protocol: String,
    pub host: String,
    pub hostname: String,
    pub port: Option<u16>,
    pub pathname: String,
    pub search: String,
    pub hash: String,
}

impl UrlParts {
    /// Parses an absolute URL
    ///
    /// # Examples
    ///
    /// ```
    /// use ink_crawler::url::UrlParts;
    ///
    /// let parts = UrlParts::parse("https://a.com:8443/list?page=2#top").unwrap();
    /// assert_eq!(parts.origin, "https://a.com:8443");
    /// assert_eq!(parts.pathname, "/list");
    /// assert_eq!(parts.search, "?page=2");
    /// ```
    pub fn parse(raw: &str) -> UrlResult<Self> {
        let url = Url::parse(raw).map_err(|e| UrlError::Parse(format!("{}: {}", raw, e)))?;

        let hostname = url
            .host_str()
            .ok_or_else(|| UrlError::Malformed(format!("missing host in {}", raw)))?
            .to_string();
        let host = match url.port() {
            Some(port) => format!("{}:{}", hostname, port),
            None => hostname.clone(),
        };

        Ok(Self {
            href: url.to_string(),
            origin: url.origin().ascii_serialization(),
            protocol: format!("{}:", url.scheme()),
            host,
            hostname,
            port: url.port(),
            pathname: url.path().to_string(),
            search: url.query().map(|q| format!("?{}", q)).unwrap_or_default(),
            hash: url.fragment().map(|f| format!("#{}", f)).unwrap_or_default(),
        })
    }
}

/// Completes a raw link found on a page
///
/// * empty and `javascript:` links are rejected
/// * protocol-relative links (`//host/x`) become `https://host/x`
/// * root-relative links (`/x`) are joined to the page origin
/// * anything else is returned unchanged
///
/// # Examples
///
/// ```
/// use ink_crawler::url::{complete_url, UrlParts};
///
/// let base = UrlParts::parse("https://a.com/list").unwrap();
/// assert_eq!(complete_url("/y", &base).as_deref(), Some("https://a.com/y"));
/// assert_eq!(complete_url("javascript:void(0)", &base), None);
/// ```
pub fn complete_url(raw: &str, base: &UrlParts) -> Option<String> {
    let raw = raw.trim();

    if raw.is_empty() || raw.to_ascii_lowercase().starts_with("javascript:") {
        return None;
    }

    if let Some(rest) = raw.strip_prefix("//") {
        return Some(format!("https://{}", rest));
    }

    if raw.starts_with('/') {
        return Some(format!("{}{}", base.origin, raw));
    }

    Some(raw.to_string())
}

/// Returns true for absolute http(s) URLs with something after the scheme
pub fn is_http_url(url: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| url.strip_prefix(scheme).is_some_and(|rest| !rest.is_empty()))
}

/// Percent-encodes characters that are not valid in a URL
///
/// Reserved characters and existing escapes are preserved; unparseable input
/// is returned unchanged and left for the HTTP client to reject.
pub fn encode_uri(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => url.to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Deterministic hex SHA-256 of a URL
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> UrlParts {
        UrlParts::parse("https://a.com/list/1?x=1").unwrap()
    }

    #[test]
    fn test_parse_parts() {
        let parts = base();
        assert_eq!(parts.origin, "https://a.com");
        assert_eq!(parts.protocol, "https:");
        assert_eq!(parts.host, "a.com");
        assert_eq!(parts.port, None);
        assert_eq!(parts.pathname, "/list/1");
        assert_eq!(parts.search, "?x=1");
        assert_eq!(parts.hash, "");
    }

    #[test]
    fn test_parse_rejects_relative() {
        assert!(UrlParts::parse("/relative").is_err());
        assert!(UrlParts::parse("").is_err());
    }

    #[test]
    fn test_complete_protocol_relative() {
        assert_eq!(
            complete_url("//example.com/x", &base()).as_deref(),
            Some("https://example.com/x")
        );
    }

    #[test]
    fn test_complete_root_relative() {
        assert_eq!(
            complete_url("/y", &base()).as_deref(),
            Some("https://a.com/y")
        );
    }

    #[test]
    fn test_complete_rejects() {
        assert_eq!(complete_url("", &base()), None);
        assert_eq!(complete_url("   ", &base()), None);
        assert_eq!(complete_url("javascript:void(0)", &base()), None);
        assert_eq!(complete_url("JavaScript:alert(1)", &base()), None);
    }

    #[test]
    fn test_complete_passthrough() {
        assert_eq!(
            complete_url("https://b.com/z", &base()).as_deref(),
            Some("https://b.com/z")
        );
        assert_eq!(
            complete_url("page2.html", &base()).as_deref(),
            Some("page2.html")
        );
    }

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("http://a.com"));
        assert!(is_http_url("https://a.com/x"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("ftp://a.com"));
        assert!(!is_http_url("page2.html"));
    }

    #[test]
    fn test_encode_uri() {
        assert_eq!(
            encode_uri("https://a.com/search?q=hello world"),
            "https://a.com/search?q=hello%20world"
        );
        assert_eq!(encode_uri("https://a.com/a%20b"), "https://a.com/a%20b");
        assert_eq!(encode_uri("not a url"), "not a url");
    }

    #[test]
    fn test_url_hash_is_stable() {
        let a = url_hash("https://a.com/");
        assert_eq!(a, url_hash("https://a.com/"));
        assert_ne!(a, url_hash("https://a.com/x"));
        assert_eq!(a.len(), 64);
    }
}
