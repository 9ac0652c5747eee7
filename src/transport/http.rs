//! [`reqwest`]-backed [`Transport`].
//!
//! Requests go out as GET with the payload appended to the query string,
//! unless the URL plus payload would exceed `post_threshold` bytes; then
//! the payload moves into a form-encoded POST body.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use tracing::{debug, trace, warn};
use url::Url;

use super::wire::{Endpoint, WireRequest};
use super::{ScriptBody, Transport, TransportError, TransportFuture};

/// Conservative URL length limit for GET requests.
pub const DEFAULT_POST_THRESHOLD: usize = 1950;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A request bound to its final URL and method.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub method: Method,
    pub url: Url,
    /// Form body; only set for POST.
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Endpoint,
    post_threshold: usize,
    session_cookie: Option<String>,
}

impl HttpTransport {
    /// `timeout` bounds a single round trip and must outlast the server's
    /// long-poll hold time.
    pub fn new(
        endpoint: Endpoint,
        timeout: Duration,
        post_threshold: usize,
        session_cookie: Option<String>,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, endpoint, post_threshold, session_cookie })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Bind `request` to a URL and decide between GET and POST.
    pub fn prepare(&self, request: &WireRequest, nonce: u64) -> Prepared {
        let mut url = self.endpoint.url_for(request, nonce);
        let encoded = request.payload.encode();

        if encoded.len() + url.as_str().len() > self.post_threshold {
            return Prepared { method: Method::Post, url, body: Some(encoded) };
        }

        if !request.payload.is_empty() {
            url.query_pairs_mut().extend_pairs(request.payload.pairs().iter());
        }
        Prepared { method: Method::Get, url, body: None }
    }
}

fn nonce() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl Transport for HttpTransport {
    fn send(&self, request: WireRequest) -> TransportFuture<'_> {
        let prepared = self.prepare(&request, nonce());

        Box::pin(async move {
            debug!(
                request_type = %request.request_type,
                action = %request.action,
                method = ?prepared.method,
                "sending request"
            );
            trace!(url = %prepared.url, "request url");

            let mut builder = match prepared.method {
                Method::Get => self.client.get(prepared.url),
                Method::Post => self
                    .client
                    .post(prepared.url)
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(prepared.body.unwrap_or_default()),
            };
            if let Some(cookie) = &self.session_cookie {
                builder = builder.header(COOKIE, cookie.as_str());
            }

            let response = builder.send().await?;
            let status = response.status();
            let body: ScriptBody = response.text().await?;

            if !status.is_success() {
                warn!(status = status.as_u16(), action = %request.action, "request returned error status");
                return Err(TransportError::Status { status: status.as_u16(), body });
            }

            trace!(len = body.len(), "response body received");
            Ok(body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::wire::{Action, Payload};

    fn transport(threshold: usize) -> HttpTransport {
        let endpoint = Endpoint::new("http://localhost:8080/app/index", "vp1").unwrap();
        HttpTransport::new(endpoint, Duration::from_secs(5), threshold, None).unwrap()
    }

    #[test]
    fn short_payload_uses_get_query() {
        let t = transport(DEFAULT_POST_THRESHOLD);
        let req = WireRequest::ajax(Action::ViewportEvent)
            .callback("cb")
            .payload(Payload::new().with("value", "hello"));
        let p = t.prepare(&req, 1);
        assert_eq!(p.method, Method::Get);
        assert!(p.body.is_none());
        let last = p.url.query_pairs().last().unwrap();
        assert_eq!(last, ("value".into(), "hello".into()));
    }

    #[test]
    fn long_payload_switches_to_post() {
        let t = transport(DEFAULT_POST_THRESHOLD);
        let big = "x".repeat(DEFAULT_POST_THRESHOLD);
        let req = WireRequest::ajax(Action::ViewportEvent).payload(Payload::new().with("value", big));
        let p = t.prepare(&req, 1);
        assert_eq!(p.method, Method::Post);
        assert!(p.body.as_deref().unwrap().starts_with("value=xxx"));
        assert!(!p.url.query_pairs().any(|(k, _)| k == "value"));
    }

    #[test]
    fn threshold_is_exclusive() {
        let req = WireRequest::ajax(Action::ViewportEvent).payload(Payload::new().with("v", "abc"));
        let url_len = transport(usize::MAX).endpoint().url_for(&req, 1).as_str().len();
        let exact = url_len + req.payload.encode().len();
        assert_eq!(transport(exact).prepare(&req, 1).method, Method::Get);
        assert_eq!(transport(exact - 1).prepare(&req, 1).method, Method::Post);
    }
}
