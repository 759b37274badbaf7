//! Handler contracts: the completion signal and the hook, endpoint and
//! error-handler entry points.

use may::sync::mpsc;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::router::RoutePattern;
use crate::server::{RequestContext, ResponseContext};

/// The payload carried by a raised error: an application-chosen code plus
/// arbitrary JSON data. Error handlers are matched by exact code equality.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorData {
    pub code: u16,
    pub data: Value,
}

impl ErrorData {
    #[must_use]
    pub fn new(code: u16, data: Value) -> Self {
        Self { code, data }
    }

    /// The Forbidden error produced when an endpoint's activation guard
    /// rejects a request.
    pub(crate) fn activation_rejected(full_path: &str) -> Self {
        Self {
            code: 403,
            data: json!({
                "origin": "canActivate",
                "message": format!("The endpoint {full_path} rejected the request"),
                "fullPath": full_path,
            }),
        }
    }
}

/// What a handler step resolved to: keep going, or abort the current phase
/// and jump to error handling.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchSignal {
    Continue,
    ErrorRaised(ErrorData),
}

/// Single-use completion signal handed to every handler invocation.
///
/// A handler reports success with [`Completion::next`] or raises an error
/// with [`Completion::raise`]; the first resolution wins and any later one
/// is a no-op. The handle is cheap to clone, so a handler may move a clone
/// into a spawned coroutine and resolve it after deferred work - the
/// pipeline suspends that request until the signal resolves.
///
/// Dropping every clone without resolving counts as success: a handler that
/// simply returns (or only sends a response) lets the pipeline continue.
#[derive(Clone)]
pub struct Completion {
    tx: Arc<Mutex<Option<mpsc::Sender<DispatchSignal>>>>,
}

impl Completion {
    /// Create a signal and the receiver the pipeline blocks on.
    pub(crate) fn channel() -> (Self, mpsc::Receiver<DispatchSignal>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Report success and let the pipeline proceed to the next handler.
    pub fn next(&self) {
        self.resolve(DispatchSignal::Continue);
    }

    /// Raise an error; remaining handlers in the current phase are skipped
    /// and error handling runs for `code`.
    pub fn raise(&self, code: u16, data: Value) {
        self.resolve(DispatchSignal::ErrorRaised(ErrorData::new(code, data)));
    }

    fn resolve(&self, signal: DispatchSignal) {
        let sender = self.tx.lock().ok().and_then(|mut slot| slot.take());
        if let Some(tx) = sender {
            // The receiver only disappears when the dispatch run is already
            // over (response sent elsewhere); a failed send is a no-op.
            let _ = tx.send(signal);
        }
    }
}

/// A pre- or post-phase hook. Hooks see every request whose path matches
/// their registered pattern, before (or after) endpoint handling.
pub trait Hook: Send + Sync {
    fn call(&self, req: Arc<RequestContext>, res: ResponseContext, signal: Completion);
}

impl<F> Hook for F
where
    F: Fn(Arc<RequestContext>, ResponseContext, Completion) + Send + Sync,
{
    fn call(&self, req: Arc<RequestContext>, res: ResponseContext, signal: Completion) {
        self(req, res, signal)
    }
}

/// An endpoint handler, bound to a route pattern and method set via
/// [`crate::router::EndpointDef`].
pub trait Endpoint: Send + Sync {
    fn call(&self, req: Arc<RequestContext>, res: ResponseContext, signal: Completion);
}

impl<F> Endpoint for F
where
    F: Fn(Arc<RequestContext>, ResponseContext, Completion) + Send + Sync,
{
    fn call(&self, req: Arc<RequestContext>, res: ResponseContext, signal: Completion) {
        self(req, res, signal)
    }
}

/// A handler for errors raised with a specific code.
pub trait ErrorHandler: Send + Sync {
    fn call(
        &self,
        error: ErrorData,
        req: Arc<RequestContext>,
        res: ResponseContext,
        signal: Completion,
    );
}

impl<F> ErrorHandler for F
where
    F: Fn(ErrorData, Arc<RequestContext>, ResponseContext, Completion) + Send + Sync,
{
    fn call(
        &self,
        error: ErrorData,
        req: Arc<RequestContext>,
        res: ResponseContext,
        signal: Completion,
    ) {
        self(error, req, res, signal)
    }
}

/// Which side of endpoint handling a hook runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Pre,
    After,
}

/// Registration-time description of a hook: name, phase and optional path
/// filter. A hook registered without a path matches every request.
#[derive(Debug, Clone)]
pub struct HookConfig {
    pub name: String,
    pub phase: HookPhase,
    pub path: Option<String>,
}

impl HookConfig {
    #[must_use]
    pub fn pre(name: &str) -> Self {
        Self {
            name: name.to_string(),
            phase: HookPhase::Pre,
            path: None,
        }
    }

    #[must_use]
    pub fn after(name: &str) -> Self {
        Self {
            name: name.to_string(),
            phase: HookPhase::After,
            path: None,
        }
    }

    /// Restrict the hook to requests whose path matches `path`.
    #[must_use]
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }
}

/// A validated hook entry. Declaration order is execution order within a
/// phase.
pub struct HookRegistration {
    pub name: String,
    pub phase: HookPhase,
    pub(crate) pattern: RoutePattern,
    pub handler: Arc<dyn Hook>,
}

/// A validated error-handler entry, matched by exact code equality. There is
/// no catch-all code.
pub struct ErrorHandlerRegistration {
    pub name: String,
    pub code: u16,
    pub handler: Arc<dyn ErrorHandler>,
}
