//! Per-request context and the thin parsing glue that fills it.

use http::Method;
use may_minihttp::Request;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::sync::RwLock;
use tracing::debug;

use crate::ids::RequestId;
use crate::router::{normalize_path, ParamVec};

/// Route fields assigned once an endpoint candidate is selected.
#[derive(Default)]
struct RouteBinding {
    route_path: String,
    full_path: String,
    params: ParamVec,
}

/// Per-connection request state.
///
/// Most fields are fixed when the context is built; the route binding
/// (route path, full path, extracted params) is assigned progressively
/// during dispatch, and the extension store carries application-defined
/// values between hooks and handlers. A context is exclusively owned by one
/// dispatch run and never shared across requests.
pub struct RequestContext {
    /// Correlation id for this request (ULID).
    pub request_id: RequestId,
    method: Method,
    /// The URL as received, including any query string.
    url: String,
    /// The path component, trailing slashes normalized away.
    path: String,
    /// Header fields, keyed by lowercased name.
    headers: HashMap<String, String>,
    /// Cookies parsed from the Cookie header.
    cookies: HashMap<String, String>,
    /// Query parameters, parsed once at construction; immutable after.
    queries: HashMap<String, String>,
    /// Request body parsed as JSON, when present.
    body: Option<Value>,
    route: RwLock<RouteBinding>,
    extensions: RwLock<HashMap<String, Value>>,
}

impl RequestContext {
    /// Build a context from already-parsed request components.
    #[must_use]
    pub fn new(
        method: Method,
        url: &str,
        headers: HashMap<String, String>,
        body: Option<Value>,
    ) -> Self {
        let path = normalize_path(url.split('?').next().unwrap_or("")).to_string();
        let queries = parse_query_params(url);
        let cookies = parse_cookies(&headers);
        Self {
            request_id: RequestId::new(),
            method,
            url: url.to_string(),
            path,
            headers,
            cookies,
            queries,
            body,
            route: RwLock::new(RouteBinding::default()),
            extensions: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The normalized path used for route and hook matching.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Header lookup by name, case-insensitive per RFC 7230.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// Query parameter lookup.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.queries.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn queries(&self) -> &HashMap<String, String> {
        &self.queries
    }

    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Path parameter extracted from the URL by the matched endpoint's
    /// pattern. Uses last-write-wins semantics for duplicate names at
    /// different path depths.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<String> {
        self.route
            .read()
            .ok()
            .and_then(|route| {
                route
                    .params
                    .iter()
                    .rfind(|(k, _)| k.as_ref() == name)
                    .map(|(_, v)| v.clone())
            })
    }

    /// Extracted path parameters as an owned map.
    #[must_use]
    pub fn params_map(&self) -> HashMap<String, String> {
        self.route
            .read()
            .map(|route| {
                route
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The route prefix of the matched endpoint; empty until the endpoint
    /// phase binds a candidate.
    #[must_use]
    pub fn route_path(&self) -> String {
        self.route
            .read()
            .map(|route| route.route_path.clone())
            .unwrap_or_default()
    }

    /// The full path pattern of the matched endpoint; empty until the
    /// endpoint phase binds a candidate.
    #[must_use]
    pub fn full_path(&self) -> String {
        self.route
            .read()
            .map(|route| route.full_path.clone())
            .unwrap_or_default()
    }

    pub(crate) fn bind_route(&self, route_path: &str, full_path: &str, params: ParamVec) {
        if let Ok(mut route) = self.route.write() {
            route.route_path = route_path.to_string();
            route.full_path = full_path.to_string();
            route.params = params;
        }
    }

    /// Attach an application-defined value to this request.
    pub fn set(&self, name: &str, value: Value) {
        if let Ok(mut ext) = self.extensions.write() {
            ext.insert(name.to_string(), value);
        }
    }

    /// Read back an application-defined value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.extensions
            .read()
            .ok()
            .and_then(|ext| ext.get(name).cloned())
    }

    /// Whether the request was made with XMLHttpRequest (an AJAX request).
    #[must_use]
    pub fn is_xhr(&self) -> bool {
        self.header("x-requested-with")
            .is_some_and(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Whether the request's Content-Type equals the given MIME type.
    #[must_use]
    pub fn is_content_type(&self, mime: &str) -> bool {
        self.content_type() == Some(mime)
    }
}

/// Parse the Cookie header into name/value pairs.
#[must_use]
pub fn parse_cookies(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .get("cookie")
        .map(|c| {
            c.split(';')
                .filter_map(|pair| {
                    let mut parts = pair.trim().splitn(2, '=');
                    let name = parts.next()?.trim().to_string();
                    let value = parts.next().unwrap_or("").trim().to_string();
                    Some((name, value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse and URL-decode the query string of a URL.
#[must_use]
pub fn parse_query_params(url: &str) -> HashMap<String, String> {
    if let Some(pos) = url.find('?') {
        let query_str = normalize_path(&url[pos + 1..]);
        url::form_urlencoded::parse(query_str.as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    } else {
        HashMap::new()
    }
}

/// Extract a [`RequestContext`] from a raw `may_minihttp` request.
pub(crate) fn read_request(req: Request) -> RequestContext {
    let method: Method = req.method().parse().unwrap_or(Method::GET);
    let url = req.path().to_string();

    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    let body = {
        let mut body_str = String::new();
        match req.body().read_to_string(&mut body_str) {
            Ok(size) if size > 0 => serde_json::from_str(&body_str).ok(),
            _ => None,
        }
    };

    let ctx = RequestContext::new(method, &url, headers, body);
    debug!(
        request_id = %ctx.request_id,
        method = %ctx.method(),
        path = %ctx.path(),
        header_count = ctx.headers().len(),
        query_count = ctx.queries().len(),
        has_body = ctx.body().is_some(),
        "HTTP request parsed"
    );
    ctx
}
