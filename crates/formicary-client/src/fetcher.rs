use std::time::{Duration, Instant};

use formicary_core::error::CrawlError;
use formicary_core::request::{Method, Request};
use formicary_core::response::Response;
use formicary_core::traits::Fetcher;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};

const DEFAULT_USER_AGENT: &str = concat!("formicary/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
    headers
}

/// HTTP fetcher using reqwest.
///
/// Transport policy only: every received status, 404 included, comes back
/// as `Ok(Response)`. Retry, breaker, and throttling decisions belong to
/// the downloader sitting above.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, CrawlError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Client-level safety-net timeout. The downloader usually enforces a
    /// tighter one per attempt.
    pub fn with_timeout(timeout: Duration) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .default_headers(default_headers())
            .timeout(timeout)
            .build()
            .map_err(|e| CrawlError::Connect(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    /// Use a caller-configured client (proxy, custom TLS, cookie store).
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout_secs: timeout.as_secs(),
        }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
        Method::Patch => reqwest::Method::PATCH,
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, CrawlError> {
        match request.url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(CrawlError::InvalidUrl(format!(
                    "scheme '{scheme}' is not fetchable (only http/https)"
                )));
            }
        }

        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CrawlError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                CrawlError::Connect(format!("connection failed: {e}"))
            } else {
                CrawlError::Connect(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = response
            .text()
            .await
            .map_err(|e| CrawlError::Content(format!("failed to read response body: {e}")))?;

        let elapsed = started.elapsed();
        tracing::debug!(
            url = %request.url,
            status,
            elapsed_ms = %elapsed.as_millis(),
            "Fetched"
        );

        Ok(Response {
            status,
            headers,
            body,
            elapsed,
            request: request.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[tokio::test]
    async fn non_http_scheme_is_rejected() {
        let fetcher = ReqwestFetcher::new().unwrap();
        let request = Request::get(Url::parse("file:///etc/passwd").unwrap());
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(err, CrawlError::InvalidUrl(_)));
    }

    #[test]
    fn method_mapping_covers_all_variants() {
        for method in [
            Method::Get,
            Method::Head,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Options,
            Method::Patch,
        ] {
            assert_eq!(to_reqwest_method(method).as_str(), method.as_str());
        }
    }
}
