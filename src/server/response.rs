//! Per-request response state with a one-way "headers sent" latch.

use may_minihttp::Response;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Reason phrase for a status code.
fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

struct Pending {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Default for Pending {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

#[derive(Default)]
struct ResponseInner {
    headers_sent: AtomicBool,
    pending: Mutex<Pending>,
}

/// Per-connection response state.
///
/// The pending status code and header set are held until a `send_*` call
/// transmits the response; the `headers_sent` flag then latches true and
/// never unlatches. Every send path checks the latch first, so exactly one
/// response wins no matter how many handlers (or deferred coroutines) try.
///
/// The handle is cheap to clone (`Arc` inner) so handlers can carry it into
/// spawned coroutines.
#[derive(Clone, Default)]
pub struct ResponseContext {
    inner: Arc<ResponseInner>,
}

impl ResponseContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a response has already been transmitted for this request.
    /// One-way transition: once true, always true.
    #[must_use]
    pub fn headers_sent(&self) -> bool {
        self.inner.headers_sent.load(Ordering::Acquire)
    }

    /// Stage the status code for the response. No effect once a response has
    /// been sent.
    pub fn status(&self, code: u16) -> &Self {
        if self.headers_sent() {
            return self;
        }
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.status = code;
        }
        self
    }

    /// Create or replace a header field. No effect once a response has been
    /// sent.
    pub fn set_header(&self, field: &str, value: &str) -> &Self {
        if self.headers_sent() {
            return self;
        }
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending
                .headers
                .retain(|(k, _)| !k.eq_ignore_ascii_case(field));
            pending.headers.push((field.to_string(), value.to_string()));
        }
        self
    }

    /// Append a value to a header field, keeping any existing values. No
    /// effect once a response has been sent.
    pub fn append_header(&self, field: &str, value: &str) -> &Self {
        if self.headers_sent() {
            return self;
        }
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.headers.push((field.to_string(), value.to_string()));
        }
        self
    }

    /// Set the Content-Type header.
    pub fn content_type(&self, mime: &str) -> &Self {
        self.set_header("Content-Type", mime)
    }

    /// Send a JSON body. First response wins; a duplicate send is a logged
    /// no-op.
    pub fn send_json(&self, body: &Value) {
        let bytes = serde_json::to_vec(body).unwrap_or_default();
        self.transmit(Some("application/json"), bytes);
    }

    /// Send a plain-text body.
    pub fn send_text(&self, body: &str) {
        self.transmit(Some("text/plain"), body.as_bytes().to_vec());
    }

    /// Send a status code with its reason phrase as the body.
    pub fn send_status(&self, code: u16) {
        self.status(code);
        self.send_text(status_reason(code));
    }

    /// Send the response without any body.
    pub fn end(&self) {
        self.transmit(None, Vec::new());
    }

    /// Flip the latch and freeze the pending response. All code paths that
    /// write to the client go through here.
    fn transmit(&self, default_content_type: Option<&str>, body: Vec<u8>) {
        if self
            .inner
            .headers_sent
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("A response has already been sent for this request");
            return;
        }
        if let Ok(mut pending) = self.inner.pending.lock() {
            if let Some(mime) = default_content_type {
                let has_content_type = pending
                    .headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
                if !has_content_type {
                    pending
                        .headers
                        .push(("Content-Type".to_string(), mime.to_string()));
                }
            }
            pending.body = body;
        }
    }

    /// Take the transmitted response for writing to the wire: the staged
    /// status, the header set and the body. `None` when no response was
    /// produced (the documented no-response gap).
    ///
    /// Server hosts call this exactly once, after dispatch ends.
    #[must_use]
    pub fn take_response(&self) -> Option<(u16, Vec<(String, String)>, Vec<u8>)> {
        if !self.headers_sent() {
            return None;
        }
        self.inner.pending.lock().ok().map(|mut pending| {
            let pending = std::mem::take(&mut *pending);
            (pending.status, pending.headers, pending.body)
        })
    }
}

/// Write a buffered response out to the `may_minihttp` sink.
pub(crate) fn write_response(
    res: &mut Response,
    status: u16,
    headers: &[(String, String)],
    body: Vec<u8>,
) {
    res.status_code(status as usize, status_reason(status));
    for (field, value) in headers {
        // may_minihttp takes header lines as &'static str; dynamic values
        // have to be leaked for the lifetime of the connection write.
        let line = format!("{field}: {value}").into_boxed_str();
        res.header(Box::leak(line));
    }
    res.body_vec(body);
}

/// Write a JSON error body directly, bypassing any response context.
pub(crate) fn write_json_error(res: &mut Response, status: u16, body: Value) {
    res.status_code(status as usize, status_reason(status));
    res.header("Content-Type: application/json");
    res.body_vec(body.to_string().into_bytes());
}
