//! Request/response data model.
//!
//! A [`Request`] carries its callback and errback as *names*, not
//! closures — the scraper resolves them against the spider at dispatch
//! time. This keeps a `Request` plain data: serializable, cloneable, safe
//! to hand to a persistent scheduler without smuggling a `Box<dyn Fn>`
//! through `serde`.

mod headers;

pub use headers::Headers;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

/// HTTP method. Only the handful a crawler realistically issues; anything
/// else is a `UsageError` at `Request` construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Head,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

mod url_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use url::Url;

    pub fn serialize<S>(url: &Url, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(url.as_str())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Url, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Url::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A unit of crawl work. Cheap to clone (an `Arc` body), hashable on URL +
/// method for scheduler dedup policies layered on top (dedup itself is a
/// Non-goal here; the fields just don't get in the way of one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(with = "url_serde")]
    pub url: Url,
    pub method: Method,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    /// Name→value cookie jar carried with the request. The core stores and
    /// forwards these; persistence/jar policy across requests is a
    /// middleware concern this crate only hosts (see module docs).
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    /// Name of the spider method to invoke with the response. Resolved
    /// against `Spider::dispatch` by the scraper, never called directly.
    #[serde(default)]
    pub callback: Option<String>,
    /// Name of the spider method to invoke on transport failure.
    #[serde(default)]
    pub errback: Option<String>,
    /// Keyword arguments threaded through to the callback untouched.
    #[serde(default)]
    pub cb_kwargs: HashMap<String, serde_json::Value>,
    /// Out-of-band bookkeeping that survives redirects/retries (depth,
    /// parent url, proxy assignment). Not passed to the callback.
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
    /// Signed priority; higher is scheduled sooner. Negative values are
    /// legal (background/low priority crawl).
    #[serde(default)]
    pub priority: i32,
    /// Bypasses scheduler-level dedup filters when true.
    #[serde(default)]
    pub dont_filter: bool,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl Request {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::Get,
            headers: Headers::new(),
            body: None,
            cookies: HashMap::new(),
            callback: None,
            errback: None,
            cb_kwargs: HashMap::new(),
            meta: HashMap::new(),
            priority: 0,
            dont_filter: false,
            encoding: default_encoding(),
        }
    }

    pub fn with_callback(mut self, name: impl Into<String>) -> Self {
        self.callback = Some(name.into());
        self
    }

    pub fn with_errback(mut self, name: impl Into<String>) -> Self {
        self.errback = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Field-by-field reconstruction, defaulting any field not given to
    /// this request's current value. Mirrors the copy/replace pattern
    /// original crawl requests use to fork a request for a redirect or a
    /// retry without hand-copying every field at each call site.
    pub fn replace(&self, f: impl FnOnce(&mut Request)) -> Request {
        let mut next = self.clone();
        f(&mut next);
        next
    }

    /// The key a slot map keys per-host scheduling on, before any metadata
    /// override. See [`Request::slot_key`] for the full precedence chain.
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// Per-host slot key: an explicit `meta["download_slot"]` override
    /// takes precedence, otherwise the request's URL host.
    pub fn slot_key(&self) -> Option<String> {
        if let Some(serde_json::Value::String(slot)) = self.meta.get("download_slot") {
            return Some(slot.clone());
        }
        self.host().map(|h| h.to_string())
    }
}

/// The result of downloading a [`Request`].
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: u16,
    pub headers: Headers,
    pub body: Arc<Vec<u8>>,
    /// Cookies the transport observed on this response (e.g. parsed out of
    /// `Set-Cookie`). Carried as plain data; a cookie-jar middleware
    /// (out of scope here) is what would persist these across requests.
    pub cookies: HashMap<String, String>,
    /// The request that produced this response. Always present: the
    /// scraper never constructs a `Response` without one.
    pub request: Arc<Request>,
}

impl Response {
    pub fn new(url: Url, status: u16, headers: Headers, body: Vec<u8>, request: Arc<Request>) -> Self {
        Self {
            url,
            status,
            headers,
            body: Arc::new(body),
            cookies: HashMap::new(),
            request,
        }
    }

    pub fn with_cookies(mut self, cookies: HashMap<String, String>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Byte weight used by the scraper's backpressure accounting. Never
    /// below `MIN_RESPONSE_SIZE` so a flood of tiny responses still costs
    /// something against `active_size`.
    pub fn weight(&self, floor: usize) -> usize {
        self.body.len().max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> Request {
        let mut headers = Headers::new();
        headers.insert("Accept", "text/html");
        headers.insert("Accept", "application/json");

        Request::new(Url::parse("https://example.com/path?q=1").unwrap())
            .with_callback("parse_listing")
            .with_errback("on_error")
            .with_priority(-5)
            .with_cookie("session", "abc123")
            .with_meta("depth", serde_json::json!(2))
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let mut original = sample_request();
        original.headers.insert("Accept", "text/html");
        original.headers.insert("Accept", "application/json");
        original.body = Some(b"hello".to_vec());
        original.dont_filter = true;
        original.cb_kwargs.insert("page".to_string(), serde_json::json!(3));

        let encoded = serde_json::to_string(&original).expect("serialize");
        let decoded: Request = serde_json::from_str(&encoded).expect("deserialize");

        assert_eq!(decoded.url, original.url);
        assert_eq!(decoded.method, original.method);
        assert_eq!(decoded.headers, original.headers);
        assert_eq!(decoded.body, original.body);
        assert_eq!(decoded.cookies, original.cookies);
        assert_eq!(decoded.meta, original.meta);
        assert_eq!(decoded.cb_kwargs, original.cb_kwargs);
        assert_eq!(decoded.priority, original.priority);
        assert_eq!(decoded.dont_filter, original.dont_filter);
        assert_eq!(decoded.callback, original.callback);
        assert_eq!(decoded.errback, original.errback);
        assert_eq!(decoded.encoding, original.encoding);
    }

    #[test]
    fn slot_key_prefers_meta_override_over_host() {
        let request = sample_request().with_meta("download_slot", serde_json::json!("pinned-host"));
        assert_eq!(request.slot_key().as_deref(), Some("pinned-host"));
    }

    #[test]
    fn slot_key_falls_back_to_url_host() {
        let request = sample_request();
        assert_eq!(request.slot_key().as_deref(), Some("example.com"));
    }

    #[test]
    fn response_weight_is_floored_by_min_response_size() {
        let request = Arc::new(sample_request());
        let tiny = Response::new(
            Url::parse("https://example.com").unwrap(),
            200,
            Headers::new(),
            b"ok".to_vec(),
            request.clone(),
        );
        assert_eq!(tiny.weight(1024), 1024);

        let big = Response::new(
            Url::parse("https://example.com").unwrap(),
            200,
            Headers::new(),
            vec![0u8; 2048],
            request,
        );
        assert_eq!(big.weight(1024), 2048);
    }

    #[test]
    fn is_success_only_for_2xx() {
        let request = Arc::new(sample_request());
        let make = |status| {
            Response::new(
                Url::parse("https://example.com").unwrap(),
                status,
                Headers::new(),
                Vec::new(),
                request.clone(),
            )
        };
        assert!(make(200).is_success());
        assert!(make(299).is_success());
        assert!(!make(301).is_success());
        assert!(!make(404).is_success());
    }
}
