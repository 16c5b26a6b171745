use crate::{UrlError, UrlResult};
use regex::Regex;

/// A compiled set of URL regular expressions; any one matching is a match
#[derive(Debug, Clone, Default)]
pub struct UrlPattern {
    regexes: Vec<Regex>,
}

impl UrlPattern {
    /// Compiles every pattern, failing on the first invalid one
    ///
    /// # Examples
    ///
    /// ```
    /// use ink_crawler::url::UrlPattern;
    ///
    /// let pattern = UrlPattern::new(&["https://a\\.com/list/.*", "https://a\\.com/tag/.*"]).unwrap();
    /// assert!(pattern.is_match("https://a.com/tag/rust"));
    /// assert!(!pattern.is_match("https://b.com/list/1"));
    /// ```
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> UrlResult<Self> {
        let regexes = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| UrlError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<UrlResult<Vec<_>>>()?;
        Ok(Self { regexes })
    }

    pub fn is_match(&self, url: &str) -> bool {
        self.regexes.iter().any(|re| re.is_match(url))
    }

    pub fn patterns(&self) -> Vec<&str> {
        self.regexes.iter().map(|re| re.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.regexes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pattern() {
        let pattern = UrlPattern::new(&["^https://example\\.com/page/\\d+$"]).unwrap();
        assert!(pattern.is_match("https://example.com/page/12"));
        assert!(!pattern.is_match("https://example.com/page/abc"));
    }

    #[test]
    fn test_any_pattern_matches() {
        let pattern = UrlPattern::new(&["/list", "/detail"]).unwrap();
        assert!(pattern.is_match("https://a.com/list?page=2"));
        assert!(pattern.is_match("https://a.com/detail/1"));
        assert!(!pattern.is_match("https://a.com/about"));
    }

    #[test]
    fn test_empty_set_never_matches() {
        let pattern = UrlPattern::new::<&str>(&[]).unwrap();
        assert!(pattern.is_empty());
        assert!(!pattern.is_match("https://a.com/"));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = UrlPattern::new(&["ok", "(broken"]);
        assert!(matches!(result, Err(UrlError::InvalidPattern { .. })));
    }
}
