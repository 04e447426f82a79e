use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

/// HTTP method of a crawl request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            "PATCH" => Ok(Method::Patch),
            _ => Err(format!("unsupported HTTP method: {}", s)),
        }
    }
}

/// A single crawl request.
///
/// Immutable once built except for `retry_count`, which the scheduler
/// bumps on each re-admission. `meta` is opaque caller data carried
/// through to the response or failure record untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub url: Url,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    /// Lower values are served first; ties break by insertion order.
    pub priority: i32,
    pub retry_count: u32,
    /// Per-request retry budget; `None` falls back to the crawl-wide
    /// default.
    pub max_retries: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub meta: serde_json::Value,
    /// When false the request bypasses the seen-set (deliberate re-fetch).
    pub dedup: bool,
}

impl Request {
    pub fn new(url: Url, method: Method) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            method,
            headers: Vec::new(),
            body: None,
            priority: 0,
            retry_count: 0,
            max_retries: None,
            created_at: Utc::now(),
            meta: serde_json::Value::Null,
            dedup: true,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(url, Method::Get)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    /// Whether the retry budget still has room, given the crawl-wide
    /// default budget.
    pub fn can_retry(&self, default_max: u32) -> bool {
        self.retry_count < self.max_retries.unwrap_or(default_max)
    }

    /// Gate/breaker key for the target: `scheme://host:port`.
    pub fn host_key(&self) -> Option<String> {
        let host = self.url.host_str()?;
        let port = self
            .url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", self.url.scheme(), host, port))
    }

    /// Normalized identity used for duplicate suppression.
    ///
    /// `METHOD:url-without-fragment[:sha256(body)]`. Two requests that
    /// differ only in fragment, header order, priority, or metadata
    /// collapse to the same key.
    pub fn dedup_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);

        match &self.body {
            Some(body) => {
                let digest = Sha256::digest(body);
                format!("{}:{}:{:x}", self.method, url, digest)
            }
            None => format!("{}:{}", self.method, url),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.method, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn method_roundtrip() {
        for method in [
            Method::Get,
            Method::Head,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Options,
            Method::Patch,
        ] {
            let parsed: Method = method.as_str().parse().unwrap();
            assert_eq!(parsed, method);
        }
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn builder_defaults() {
        let req = Request::get(url("https://example.com/a"));
        assert_eq!(req.retry_count, 0);
        assert_eq!(req.max_retries, None);
        assert_eq!(req.priority, 0);
        assert!(req.dedup);
        assert!(req.can_retry(3));
    }

    #[test]
    fn host_key_includes_scheme_and_port() {
        let req = Request::get(url("https://example.com/page?q=1"));
        assert_eq!(req.host_key().unwrap(), "https://example.com:443");

        let req = Request::get(url("http://example.com:8080/page"));
        assert_eq!(req.host_key().unwrap(), "http://example.com:8080");
    }

    #[test]
    fn dedup_key_ignores_fragment() {
        let a = Request::get(url("https://example.com/page#top"));
        let b = Request::get(url("https://example.com/page#bottom"));
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn dedup_key_distinguishes_method_and_body() {
        let get = Request::get(url("https://example.com/form"));
        let post = Request::new(url("https://example.com/form"), Method::Post);
        assert_ne!(get.dedup_key(), post.dedup_key());

        let a = post.clone().with_body(b"x=1".to_vec());
        let b = Request::new(url("https://example.com/form"), Method::Post)
            .with_body(b"x=2".to_vec());
        assert_ne!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn retry_budget() {
        let mut req = Request::get(url("https://example.com")).with_max_retries(1);
        assert!(req.can_retry(3));
        req.retry_count = 1;
        assert!(!req.can_retry(3));

        // No override: the crawl default applies.
        let req = Request::get(url("https://example.com"));
        assert!(req.can_retry(1));
        assert!(!req.can_retry(0));
    }
}
