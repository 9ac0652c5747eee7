//! Wire contract — request parameters and URL construction.
//!
//! Every call targets the page's directory URL with these query parameters,
//! in this order:
//!
//! ```text
//! ?_sw_viewport_id=<id>
//! &_sw_request_type=ajax|comet
//! &do=<action>
//! [&_sw_widget-id=<id>]
//! [&_sw_callback-id=<id>]
//! [&code-id=<id>]
//! &_=<nonce>
//! ```
//!
//! The payload travels either appended to the query (GET) or as a form body
//! (POST); [`crate::transport::http`] picks the method.

use std::fmt;

use url::{Url, form_urlencoded};

use super::TransportError;

pub const PARAM_VIEWPORT_ID: &str = "_sw_viewport_id";
pub const PARAM_REQUEST_TYPE: &str = "_sw_request_type";
pub const PARAM_ACTION: &str = "do";
pub const PARAM_WIDGET_ID: &str = "_sw_widget-id";
pub const PARAM_CALLBACK_ID: &str = "_sw_callback-id";
pub const PARAM_CODE_ID: &str = "code-id";
pub const PARAM_NONCE: &str = "_";

// ── RequestType / Action ─────────────────────────────────────────────────────

/// Which channel a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// Queued event calls.
    Ajax,
    /// The long-poll push channel.
    Comet,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Ajax => "ajax",
            RequestType::Comet => "comet",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of the `do` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    WidgetEvent,
    ViewportEvent,
    Unload,
    Boot,
    Refresh,
    Ack,
    Timeout,
    Error,
    TerminateSession,
    /// Return value of a server-requested computation.
    JsAck,
    /// Failure of a server-requested computation.
    JsFail,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::WidgetEvent => "widget-event",
            Action::ViewportEvent => "viewport-event",
            Action::Unload => "unload",
            Action::Boot => "boot",
            Action::Refresh => "refresh",
            Action::Ack => "ack",
            Action::Timeout => "timeout",
            Action::Error => "error",
            Action::TerminateSession => "terminate-session",
            Action::JsAck => "js-ack",
            Action::JsFail => "js-fail",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Payload ──────────────────────────────────────────────────────────────────

/// Form-encoded request body as ordered key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pairs: Vec<(String, String)>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// `application/x-www-form-urlencoded` rendering of the pairs.
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

// ── WireRequest ──────────────────────────────────────────────────────────────

/// One outbound call, before it is bound to an [`Endpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    pub request_type: RequestType,
    pub action: Action,
    pub widget_id: Option<String>,
    pub callback_id: Option<String>,
    pub code_id: Option<String>,
    pub payload: Payload,
}

impl WireRequest {
    fn new(request_type: RequestType, action: Action) -> Self {
        Self {
            request_type,
            action,
            widget_id: None,
            callback_id: None,
            code_id: None,
            payload: Payload::new(),
        }
    }

    pub fn ajax(action: Action) -> Self {
        Self::new(RequestType::Ajax, action)
    }

    pub fn comet(action: Action) -> Self {
        Self::new(RequestType::Comet, action)
    }

    pub fn widget(mut self, widget_id: impl Into<String>) -> Self {
        self.widget_id = Some(widget_id.into());
        self
    }

    pub fn callback(mut self, callback_id: impl Into<String>) -> Self {
        self.callback_id = Some(callback_id.into());
        self
    }

    pub fn code(mut self, code_id: impl Into<String>) -> Self {
        self.code_id = Some(code_id.into());
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }
}

// ── Endpoint ─────────────────────────────────────────────────────────────────

/// Binds requests to the page URL and the viewport they belong to.
#[derive(Debug, Clone)]
pub struct Endpoint {
    base: Url,
    viewport_id: String,
}

impl Endpoint {
    /// Build from the page URL. The last path segment (the page itself) is
    /// dropped and empty segments are skipped, so `http://h/app//index`
    /// targets `http://h/app`.
    pub fn new(page_url: &str, viewport_id: impl Into<String>) -> Result<Self, TransportError> {
        let page = Url::parse(page_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{page_url}: {e}")))?;
        if page.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(format!("{page_url}: not a base url")));
        }

        let mut segments: Vec<&str> = page.path_segments().map(|s| s.collect()).unwrap_or_default();
        segments.pop();
        let dir: String = segments
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(|s| format!("/{s}"))
            .collect();

        let mut base = page.clone();
        base.set_path(&dir);
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { base, viewport_id: viewport_id.into() })
    }

    /// Prefix the host with a dynamic subdomain, e.g. `"c7."` turns
    /// `example.org` into `c7.example.org`. A missing trailing dot is added.
    pub fn with_dynamic_subdomain(mut self, subdomain: &str) -> Result<Self, TransportError> {
        let label = subdomain.trim_end_matches('.');
        if label.is_empty() {
            return Ok(self);
        }
        let host = self
            .base
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{}: no host", self.base)))?;
        let prefixed = format!("{label}.{host}");
        self.base
            .set_host(Some(&prefixed))
            .map_err(|e| TransportError::InvalidUrl(format!("{prefixed}: {e}")))?;
        Ok(self)
    }

    /// Full request URL, without the payload.
    pub fn url_for(&self, request: &WireRequest, nonce: u64) -> Url {
        let mut url = self.base.clone();
        {
            let mut q = url.query_pairs_mut();
            q.append_pair(PARAM_VIEWPORT_ID, &self.viewport_id);
            q.append_pair(PARAM_REQUEST_TYPE, request.request_type.as_str());
            q.append_pair(PARAM_ACTION, request.action.as_str());
            if let Some(id) = &request.widget_id {
                q.append_pair(PARAM_WIDGET_ID, id);
            }
            if let Some(id) = &request.callback_id {
                q.append_pair(PARAM_CALLBACK_ID, id);
            }
            if let Some(id) = &request.code_id {
                q.append_pair(PARAM_CODE_ID, id);
            }
            q.append_pair(PARAM_NONCE, &nonce.to_string());
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(url: &Url) -> Vec<(String, String)> {
        url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect()
    }

    #[test]
    fn endpoint_drops_page_segment() {
        let ep = Endpoint::new("http://example.org:8080/app/index.html", "vp1").unwrap();
        let url = ep.url_for(&WireRequest::comet(Action::Boot), 7);
        assert_eq!(url.path(), "/app");
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn endpoint_skips_empty_segments() {
        let ep = Endpoint::new("http://example.org/a//b/page", "vp1").unwrap();
        let url = ep.url_for(&WireRequest::comet(Action::Boot), 0);
        assert_eq!(url.path(), "/a/b");
    }

    #[test]
    fn endpoint_root_page() {
        let ep = Endpoint::new("http://example.org/", "vp1").unwrap();
        let url = ep.url_for(&WireRequest::comet(Action::Boot), 0);
        assert_eq!(url.path(), "/");
    }

    #[test]
    fn endpoint_discards_page_query_and_fragment() {
        let ep = Endpoint::new("http://example.org/app/x?foo=1#top", "vp1").unwrap();
        let url = ep.url_for(&WireRequest::comet(Action::Boot), 0);
        assert!(url.fragment().is_none());
        assert!(!query(&url).iter().any(|(k, _)| k == "foo"));
    }

    #[test]
    fn dynamic_subdomain_prefixes_host() {
        let ep = Endpoint::new("http://example.org:8080/app/index", "vp1")
            .unwrap()
            .with_dynamic_subdomain("c7.")
            .unwrap();
        let url = ep.url_for(&WireRequest::comet(Action::Boot), 0);
        assert_eq!(url.host_str(), Some("c7.example.org"));
        assert_eq!(url.port(), Some(8080));
        assert_eq!(url.path(), "/app");

        let bare = Endpoint::new("http://example.org/app/index", "vp1")
            .unwrap()
            .with_dynamic_subdomain("c7")
            .unwrap();
        assert_eq!(bare.url_for(&WireRequest::comet(Action::Boot), 0).host_str(), Some("c7.example.org"));
    }

    #[test]
    fn empty_dynamic_subdomain_keeps_host() {
        let ep = Endpoint::new("http://example.org/app/index", "vp1")
            .unwrap()
            .with_dynamic_subdomain("")
            .unwrap();
        assert_eq!(ep.url_for(&WireRequest::comet(Action::Boot), 0).host_str(), Some("example.org"));
    }

    #[test]
    fn invalid_page_url_errors() {
        assert!(matches!(
            Endpoint::new("not a url", "vp1"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(Endpoint::new("mailto:someone@example.org", "vp1").is_err());
    }

    #[test]
    fn widget_event_parameters_in_order() {
        let ep = Endpoint::new("http://example.org/app/", "vp-9").unwrap();
        let req = WireRequest::ajax(Action::WidgetEvent).widget("w1").callback("cb1");
        let pairs = query(&ep.url_for(&req, 42));
        let expected: Vec<(String, String)> = [
            ("_sw_viewport_id", "vp-9"),
            ("_sw_request_type", "ajax"),
            ("do", "widget-event"),
            ("_sw_widget-id", "w1"),
            ("_sw_callback-id", "cb1"),
            ("_", "42"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(pairs, expected);
    }

    #[test]
    fn viewport_event_has_no_widget_id() {
        let ep = Endpoint::new("http://example.org/app/", "vp").unwrap();
        let req = WireRequest::ajax(Action::ViewportEvent).callback("cb");
        let pairs = query(&ep.url_for(&req, 0));
        assert!(!pairs.iter().any(|(k, _)| k == PARAM_WIDGET_ID));
        assert!(pairs.contains(&("do".into(), "viewport-event".into())));
    }

    #[test]
    fn comet_reasons_map_to_do_values() {
        for (action, value) in [
            (Action::Boot, "boot"),
            (Action::Refresh, "refresh"),
            (Action::Ack, "ack"),
            (Action::Timeout, "timeout"),
        ] {
            assert_eq!(action.as_str(), value);
        }
        assert_eq!(RequestType::Comet.to_string(), "comet");
    }

    #[test]
    fn payload_encodes_form_pairs() {
        let p = Payload::new().with("value", "a b&c").with("x", "1");
        assert_eq!(p.encode(), "value=a+b%26c&x=1");
        assert!(Payload::new().encode().is_empty());
    }
}
