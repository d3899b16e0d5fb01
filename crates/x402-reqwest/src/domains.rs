//! Which hosts an agent is willing to pay.

use url::Url;

/// A host pattern: `api.example.com` matches that host only, `*.example.com` matches
/// any subdomain of `example.com` but not `example.com` itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainPattern {
    Exact(String),
    Subdomains(String),
}

impl DomainPattern {
    pub fn matches(&self, host: &str) -> bool {
        let host = normalize(host);
        match self {
            DomainPattern::Exact(domain) => host == *domain,
            DomainPattern::Subdomains(suffix) => host
                .strip_suffix(suffix.as_str())
                .is_some_and(|rest| rest.len() > 1 && rest.ends_with('.')),
        }
    }
}

impl From<&str> for DomainPattern {
    fn from(pattern: &str) -> Self {
        match pattern.trim().strip_prefix("*.") {
            Some(suffix) => DomainPattern::Subdomains(normalize(suffix)),
            None => DomainPattern::Exact(normalize(pattern.trim())),
        }
    }
}

fn normalize(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Domain {0} is not in the allowed list")]
    NotAllowed(String),
    #[error("Domain {0} is blocked")]
    Blocked(String),
}

/// Allow and block lists. Blocking wins; an empty policy allows every host.
#[derive(Debug, Clone, Default)]
pub struct DomainPolicy {
    allowed: Option<Vec<DomainPattern>>,
    blocked: Vec<DomainPattern>,
}

impl DomainPolicy {
    /// Restricts payments to hosts matching one of `patterns`. Repeated calls extend the list.
    pub fn allow<P: AsRef<str>>(mut self, patterns: impl IntoIterator<Item = P>) -> Self {
        self.allowed
            .get_or_insert_with(Vec::new)
            .extend(patterns.into_iter().map(|p| DomainPattern::from(p.as_ref())));
        self
    }

    pub fn block<P: AsRef<str>>(mut self, patterns: impl IntoIterator<Item = P>) -> Self {
        self.blocked
            .extend(patterns.into_iter().map(|p| DomainPattern::from(p.as_ref())));
        self
    }

    pub fn check(&self, url: &Url) -> Result<(), DomainError> {
        let host = url.host_str().unwrap_or_default();
        if self.blocked.iter().any(|p| p.matches(host)) {
            return Err(DomainError::Blocked(host.to_string()));
        }
        match &self.allowed {
            Some(allowed) if !allowed.iter().any(|p| p.matches(host)) => {
                Err(DomainError::NotAllowed(host.to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_patterns() {
        let exact = DomainPattern::from("API.example.com");
        assert!(exact.matches("api.example.com"));
        assert!(exact.matches("api.example.com."));
        assert!(!exact.matches("v2.api.example.com"));

        let wildcard = DomainPattern::from("*.example.com");
        assert!(wildcard.matches("api.example.com"));
        assert!(wildcard.matches("a.b.example.com"));
        assert!(!wildcard.matches("example.com"));
        assert!(!wildcard.matches("badexample.com"));
    }

    #[test]
    fn test_empty_policy_allows_everything() {
        assert!(DomainPolicy::default().check(&url("https://anything.io/x")).is_ok());
    }

    #[test]
    fn test_allow_list() {
        let policy = DomainPolicy::default().allow(["api.example.com", "*.data.io"]);
        assert!(policy.check(&url("https://api.example.com/v1")).is_ok());
        assert!(policy.check(&url("https://eu.data.io/feed")).is_ok());
        assert_eq!(
            policy.check(&url("https://evil.com/")),
            Err(DomainError::NotAllowed("evil.com".into()))
        );
    }

    #[test]
    fn test_block_wins_over_allow() {
        let policy = DomainPolicy::default()
            .allow(["*.example.com"])
            .block(["ads.example.com"]);
        assert!(policy.check(&url("https://api.example.com/")).is_ok());
        assert_eq!(
            policy.check(&url("https://ads.example.com/")),
            Err(DomainError::Blocked("ads.example.com".into()))
        );
    }

    #[test]
    fn test_port_is_ignored() {
        let policy = DomainPolicy::default().allow(["127.0.0.1"]);
        assert!(policy.check(&url("http://127.0.0.1:8080/paid")).is_ok());
    }
}
