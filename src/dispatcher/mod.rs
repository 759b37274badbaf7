//! # Dispatcher Module
//!
//! The per-request dispatch pipeline. Each request walks a fixed sequence of
//! phases:
//!
//! ```text
//! pre_hooks -> endpoint -> after_hooks -> error_handling -> done
//! ```
//!
//! Every phase runs its handlers strictly in registration order. After each
//! handler step the pipeline applies the same transition rule:
//!
//! 1. if a response has been transmitted, the whole pipeline halts
//!    (first-response-wins);
//! 2. if the handler raised an error, the rest of the phase is skipped and
//!    error handling runs for that code;
//! 3. otherwise the next handler in the phase runs.
//!
//! ## Completion signals
//!
//! Handlers drive the pipeline through a single-use [`Completion`] signal
//! rather than a return value. The handler entry method is invoked
//! synchronously, but the handler may clone the signal (together with the
//! request/response handles) into a coroutine and resolve it later - the
//! pipeline parks the request's coroutine on the signal channel until then.
//! The first resolution wins; later resolutions and duplicate sends are
//! no-ops.
//!
//! ## Registration
//!
//! ```rust,ignore
//! use hookrouter::dispatcher::{Dispatcher, HookConfig};
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.add_hook(HookConfig::pre("log_request"), log_request)?;
//! dispatcher.add_error_handler(403, "forbidden", forbidden_handler);
//! ```
//!
//! Hooks and error handlers are registered at startup; afterwards the
//! dispatcher is shared read-only by every in-flight request.

mod core;
mod handler;

pub use self::core::{DispatchOutcome, Dispatcher};
pub use handler::{
    Completion, DispatchSignal, Endpoint, ErrorData, ErrorHandler, ErrorHandlerRegistration, Hook,
    HookConfig, HookPhase, HookRegistration,
};
