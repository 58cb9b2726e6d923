// 📡 HTTP Transport - the network seam every collector strategy goes through
// One pooled reqwest client per run; short keep-alive so the process exits promptly

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str =
    "draw-ledger/0.1 (+lottery results archiver; contact: maintainer@draw-ledger.invalid)";

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_pdf(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/pdf"))
            || self.body.starts_with(b"%PDF")
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse>;

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<HttpResponse>;
}

/// Append url-encoded query pairs to a URL that may already carry a query
pub fn with_query(url: &str, pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return url.to_string();
    }
    let encoded: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, sep, encoded.join("&"))
}

// ============================================================================
// REQWEST TRANSPORT
// ============================================================================

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json,application/pdf;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.8"));

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .pool_idle_timeout(Duration::from_secs(2))
            .pool_max_idle_per_host(2)
            .build()?;

        Ok(HttpTransport { client, timeout })
    }

    /// Same connection pool, different per-request timeout
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        HttpTransport {
            client: self.client.clone(),
            timeout,
        }
    }

    async fn finish(&self, url: &str, request: reqwest::RequestBuilder) -> Result<HttpResponse> {
        let response = request.timeout(self.timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                IngestError::Timeout(url.to_string())
            } else {
                IngestError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let final_url = response.url().to_string();
        let body = response.bytes().await?.to_vec();
        debug!(url = %final_url, bytes = body.len(), "fetched");

        Ok(HttpResponse {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse> {
        let full = with_query(url, query);
        self.finish(&full, self.client.get(&full)).await
    }

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<HttpResponse> {
        let request = self
            .client
            .post(url)
            .header("X-Requested-With", "XMLHttpRequest")
            .form(form);
        self.finish(url, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_with_query_encodes_and_joins() {
        assert_eq!(
            with_query("https://x.test/more", &pairs(&[("game", "pick 3"), ("page", "2")])),
            "https://x.test/more?game=pick%203&page=2"
        );
        assert_eq!(
            with_query("https://x.test/more?lang=en", &pairs(&[("page", "3")])),
            "https://x.test/more?lang=en&page=3"
        );
        assert_eq!(with_query("https://x.test/", &[]), "https://x.test/");
    }

    #[test]
    fn test_pdf_detection_by_header_or_magic() {
        let mut response = HttpResponse {
            url: "https://x.test/a".to_string(),
            status: 200,
            content_type: Some("application/pdf".to_string()),
            body: Vec::new(),
        };
        assert!(response.is_pdf());

        response.content_type = Some("application/octet-stream".to_string());
        response.body = b"%PDF-1.7\n".to_vec();
        assert!(response.is_pdf());

        response.body = b"<html></html>".to_vec();
        assert!(!response.is_pdf());
        assert_eq!(response.text(), "<html></html>");
    }

    #[test]
    fn test_transport_builds_without_network() {
        let transport = HttpTransport::new(DEFAULT_USER_AGENT, Duration::from_secs(5)).unwrap();
        let shorter = transport.with_timeout(Duration::from_secs(1));
        assert_eq!(shorter.timeout, Duration::from_secs(1));
    }
}
