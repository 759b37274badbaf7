//! Dispatcher core - the per-request phase state machine.
//!
//! A request walks the fixed phase order `pre_hooks -> endpoint ->
//! after_hooks -> error_handling -> done`. Two signals short-circuit the
//! walk: a transmitted response halts everything, and a raised error aborts
//! the current phase and jumps to error handling.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, error, info, warn};

use super::handler::{
    Completion, DispatchSignal, ErrorData, ErrorHandler, ErrorHandlerRegistration, Hook,
    HookConfig, HookPhase, HookRegistration,
};
use crate::router::{PathKind, RoutePattern, RouteTable, RouterError};
use crate::server::{RequestContext, ResponseContext};

/// The states a dispatch run moves through, in fixed order. Any state may
/// jump straight to `ErrorHandling` (a handler raised) or `Done` (a response
/// was transmitted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    PreHooks,
    Endpoint,
    AfterHooks,
    ErrorHandling,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PreHooks => write!(f, "pre_hooks"),
            Phase::Endpoint => write!(f, "endpoint"),
            Phase::AfterHooks => write!(f, "after_hooks"),
            Phase::ErrorHandling => write!(f, "error_handling"),
            Phase::Done => write!(f, "done"),
        }
    }
}

/// How a single phase ended.
enum PhaseOutcome {
    /// Every applicable handler ran without sending or raising.
    Completed,
    /// A response was transmitted; the whole pipeline halts.
    ResponseSent,
    /// A handler raised; remaining handlers in this phase are skipped.
    Raised(ErrorData),
    /// A handler panicked; the request is over.
    Panicked { handler: String },
}

/// How a single handler step ended.
enum StepResult {
    Resolved(DispatchSignal),
    Panicked,
}

/// The caller-visible result of a dispatch run.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The pipeline reached its terminal state. Whether a response was sent
    /// is visible on the [`ResponseContext`].
    Completed,
    /// An error was raised but no registered error handler matched its code
    /// (or an error handler raised again). No response is guaranteed; the
    /// server host decides what, if anything, to send.
    UnhandledError(ErrorData),
    /// A handler panicked instead of signaling; fatal for this request only.
    HandlerPanicked { handler: String },
}

/// Per-request dispatch engine holding the hook and error-handler
/// registries.
///
/// All registries are populated at startup and shared read-only afterwards,
/// so a single `Dispatcher` serves every in-flight request concurrently
/// without synchronization.
#[derive(Default)]
pub struct Dispatcher {
    pre_hooks: Vec<HookRegistration>,
    after_hooks: Vec<HookRegistration>,
    error_handlers: Vec<ErrorHandlerRegistration>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. Hooks run in declaration order within their phase;
    /// a hook without a path filter matches every request.
    ///
    /// # Errors
    ///
    /// [`RouterError::InvalidPathSyntax`] when the path filter contains an
    /// invalid regex segment.
    pub fn add_hook(
        &mut self,
        config: HookConfig,
        handler: impl Hook + 'static,
    ) -> Result<(), RouterError> {
        let pattern = match &config.path {
            Some(path) => {
                RoutePattern::parse(path).map_err(|err| RouterError::InvalidPathSyntax {
                    kind: PathKind::Hook,
                    path: path.clone(),
                    reason: err.to_string(),
                })?
            }
            None => RoutePattern::match_all(),
        };

        info!(
            hook = %config.name,
            phase = ?config.phase,
            path = %pattern.raw(),
            "Hook registered"
        );

        let registration = HookRegistration {
            name: config.name,
            phase: config.phase,
            pattern,
            handler: Arc::new(handler),
        };
        match registration.phase {
            HookPhase::Pre => self.pre_hooks.push(registration),
            HookPhase::After => self.after_hooks.push(registration),
        }
        Ok(())
    }

    /// Register an error handler for exactly `code`.
    pub fn add_error_handler(&mut self, code: u16, name: &str, handler: impl ErrorHandler + 'static) {
        info!(error_handler = %name, code, "Error handler registered");
        self.error_handlers.push(ErrorHandlerRegistration {
            name: name.to_string(),
            code,
            handler: Arc::new(handler),
        });
    }

    #[must_use]
    pub fn pre_hooks(&self) -> &[HookRegistration] {
        &self.pre_hooks
    }

    #[must_use]
    pub fn after_hooks(&self) -> &[HookRegistration] {
        &self.after_hooks
    }

    #[must_use]
    pub fn error_handlers(&self) -> &[ErrorHandlerRegistration] {
        &self.error_handlers
    }

    /// Run one request through the full phase machine.
    ///
    /// The request and response contexts are exclusively owned by this
    /// dispatch run; the route table and registries are shared read-only.
    pub fn dispatch(
        &self,
        table: &RouteTable,
        req: &Arc<RequestContext>,
        res: &ResponseContext,
    ) -> DispatchOutcome {
        info!(
            request_id = %req.request_id,
            method = %req.method(),
            path = %req.path(),
            "Dispatch start"
        );

        let mut phase = Phase::PreHooks;
        let mut pending_error: Option<ErrorData> = None;

        loop {
            debug!(request_id = %req.request_id, phase = %phase, "Phase start");
            let outcome = match phase {
                Phase::PreHooks => self.run_hook_phase(&self.pre_hooks, req, res),
                Phase::Endpoint => self.run_endpoint_phase(table, req, res),
                Phase::AfterHooks => self.run_hook_phase(&self.after_hooks, req, res),
                Phase::ErrorHandling => {
                    let Some(err) = pending_error.take() else {
                        // Error handling is only entered with a pending error.
                        return DispatchOutcome::Completed;
                    };
                    return self.run_error_phase(err, req, res);
                }
                Phase::Done => {
                    info!(
                        request_id = %req.request_id,
                        response_sent = res.headers_sent(),
                        "Dispatch complete"
                    );
                    return DispatchOutcome::Completed;
                }
            };

            phase = match outcome {
                PhaseOutcome::Completed => match phase {
                    Phase::PreHooks => Phase::Endpoint,
                    Phase::Endpoint => Phase::AfterHooks,
                    _ => Phase::Done,
                },
                PhaseOutcome::ResponseSent => Phase::Done,
                PhaseOutcome::Raised(err) => {
                    debug!(
                        request_id = %req.request_id,
                        phase = %phase,
                        code = err.code,
                        "Error raised; remaining handlers in phase skipped"
                    );
                    pending_error = Some(err);
                    Phase::ErrorHandling
                }
                PhaseOutcome::Panicked { handler } => {
                    return DispatchOutcome::HandlerPanicked { handler };
                }
            };
        }
    }

    /// Run the hooks of one phase whose patterns match the request path.
    fn run_hook_phase(
        &self,
        hooks: &[HookRegistration],
        req: &Arc<RequestContext>,
        res: &ResponseContext,
    ) -> PhaseOutcome {
        for hook in hooks {
            if !hook.pattern.matches(req.path()) {
                debug!(
                    request_id = %req.request_id,
                    hook = %hook.name,
                    pattern = %hook.pattern.raw(),
                    "Hook skipped (path filter)"
                );
                continue;
            }
            if res.headers_sent() {
                return PhaseOutcome::ResponseSent;
            }

            let step = self.run_step(&hook.name, |signal| {
                hook.handler.call(Arc::clone(req), res.clone(), signal)
            });
            match self.inspect_step(step, &hook.name, res) {
                StepVerdict::Proceed => {}
                StepVerdict::Halt(outcome) => return outcome,
            }
        }
        PhaseOutcome::Completed
    }

    /// Resolve candidate endpoints and run them in table order.
    ///
    /// Before each candidate the route binding (route path, full path,
    /// extracted params) is assigned onto the request context and the
    /// activation guard is evaluated; a rejection surfaces as a Forbidden
    /// error rather than trying the next candidate. Zero candidates is not
    /// an error at this layer - control falls through to the after hooks.
    fn run_endpoint_phase(
        &self,
        table: &RouteTable,
        req: &Arc<RequestContext>,
        res: &ResponseContext,
    ) -> PhaseOutcome {
        let candidates = table.resolve(req.method(), req.path());
        if candidates.is_empty() {
            debug!(
                request_id = %req.request_id,
                method = %req.method(),
                path = %req.path(),
                "No endpoint matched"
            );
            return PhaseOutcome::Completed;
        }

        for endpoint in candidates {
            if res.headers_sent() {
                return PhaseOutcome::ResponseSent;
            }

            req.bind_route(
                &endpoint.route_path,
                &endpoint.full_path,
                endpoint.pattern.capture(req.path()),
            );

            if let Some(guard) = &endpoint.can_activate {
                if !guard(req.as_ref()) {
                    info!(
                        request_id = %req.request_id,
                        endpoint = %endpoint.name,
                        full_path = %endpoint.full_path,
                        "Activation guard rejected request"
                    );
                    return PhaseOutcome::Raised(ErrorData::activation_rejected(
                        &endpoint.full_path,
                    ));
                }
            }

            let step = self.run_step(&endpoint.name, |signal| {
                endpoint.handler.call(Arc::clone(req), res.clone(), signal)
            });
            match self.inspect_step(step, &endpoint.name, res) {
                StepVerdict::Proceed => {}
                StepVerdict::Halt(outcome) => return outcome,
            }
        }
        PhaseOutcome::Completed
    }

    /// Run the error handlers whose registered code equals the raised code.
    ///
    /// A valid HTTP status code is staged as the pending response status
    /// before any handler runs, so a handler that just sends a body replies
    /// with the raised code. An error raised by an error handler aborts the
    /// remainder and surfaces as unhandled.
    fn run_error_phase(
        &self,
        err: ErrorData,
        req: &Arc<RequestContext>,
        res: &ResponseContext,
    ) -> DispatchOutcome {
        if !res.headers_sent() && StatusCode::from_u16(err.code).is_ok() {
            res.status(err.code);
        }

        let mut matched = false;
        for handler in &self.error_handlers {
            if handler.code != err.code {
                continue;
            }
            matched = true;
            if res.headers_sent() {
                return DispatchOutcome::Completed;
            }

            let step = self.run_step(&handler.name, |signal| {
                handler
                    .handler
                    .call(err.clone(), Arc::clone(req), res.clone(), signal)
            });
            match step {
                StepResult::Panicked => {
                    return DispatchOutcome::HandlerPanicked {
                        handler: handler.name.clone(),
                    };
                }
                StepResult::Resolved(signal) => {
                    if res.headers_sent() {
                        return DispatchOutcome::Completed;
                    }
                    if let DispatchSignal::ErrorRaised(next) = signal {
                        warn!(
                            request_id = %req.request_id,
                            error_handler = %handler.name,
                            code = next.code,
                            "Error handler raised a further error; request ends unhandled"
                        );
                        return DispatchOutcome::UnhandledError(next);
                    }
                }
            }
        }

        if !matched {
            warn!(
                request_id = %req.request_id,
                code = err.code,
                "No error handler registered for raised code"
            );
            return DispatchOutcome::UnhandledError(err);
        }
        DispatchOutcome::Completed
    }

    /// Invoke one handler and wait for its completion signal.
    ///
    /// The handler entry method runs synchronously from the pipeline's point
    /// of view; the pipeline then parks this coroutine on the signal channel
    /// until some clone of the [`Completion`] resolves. When every clone is
    /// dropped unresolved the step counts as a plain continue.
    fn run_step<F>(&self, handler_name: &str, invoke: F) -> StepResult
    where
        F: FnOnce(Completion),
    {
        let (signal, done_rx) = Completion::channel();
        debug!(handler = %handler_name, "Handler step start");

        if catch_unwind(AssertUnwindSafe(move || invoke(signal))).is_err() {
            error!(handler = %handler_name, "Handler panicked during invocation");
            return StepResult::Panicked;
        }

        match done_rx.recv() {
            Ok(signal) => StepResult::Resolved(signal),
            // Every sender dropped without resolving: the handler finished
            // without signaling.
            Err(_) => StepResult::Resolved(DispatchSignal::Continue),
        }
    }

    /// Apply the common post-step transition rule: a transmitted response
    /// halts the pipeline, a raised error aborts the phase, anything else
    /// proceeds to the next handler.
    fn inspect_step(
        &self,
        step: StepResult,
        handler_name: &str,
        res: &ResponseContext,
    ) -> StepVerdict {
        match step {
            StepResult::Panicked => StepVerdict::Halt(PhaseOutcome::Panicked {
                handler: handler_name.to_string(),
            }),
            StepResult::Resolved(signal) => {
                if res.headers_sent() {
                    return StepVerdict::Halt(PhaseOutcome::ResponseSent);
                }
                match signal {
                    DispatchSignal::Continue => StepVerdict::Proceed,
                    DispatchSignal::ErrorRaised(err) => {
                        StepVerdict::Halt(PhaseOutcome::Raised(err))
                    }
                }
            }
        }
    }
}

enum StepVerdict {
    Proceed,
    Halt(PhaseOutcome),
}
