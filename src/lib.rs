//! # hookrouter
//!
//! **hookrouter** is a hook-driven HTTP request router for Rust with
//! first-response-wins dispatch, powered by the `may` coroutine runtime and
//! `may_minihttp`.
//!
//! ## Overview
//!
//! hookrouter routes each inbound request through a fixed pipeline of
//! pre-request hooks, endpoint handlers, post-request hooks and error
//! handlers. Routes, hooks and error handlers are registered explicitly at
//! startup; the resulting tables are validated once (path syntax, duplicate
//! detection) and then shared read-only by every in-flight request.
//!
//! ## Architecture
//!
//! The library is organized into three core modules plus supporting glue:
//!
//! - **[`router`]** - path pattern compilation (`:param`, `{regex}`, `**`)
//!   and the validated, insertion-ordered route table
//! - **[`dispatcher`]** - the per-request phase state machine and the
//!   hook / endpoint / error-handler contracts
//! - **[`server`]** - the listener host: configuration validation,
//!   request/response context construction, response flushing
//! - **[`ids`]** - ULID request identifiers for log correlation
//! - **[`runtime_config`]** - coroutine stack-size configuration
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Server as AppService<br/>(may_minihttp)
//!     participant Pipeline as Dispatcher
//!     participant Table as RouteTable
//!     participant Handler as Hook / Endpoint<br/>(Completion signal)
//!
//!     Client->>Server: HTTP Request<br/>POST /users/new
//!     Server->>Server: Build RequestContext +<br/>ResponseContext
//!     Server->>Pipeline: dispatch()
//!
//!     Pipeline->>Handler: pre hooks (path-filtered, in order)
//!     Handler-->>Pipeline: Completion resolved
//!
//!     alt Response sent by a hook
//!         Pipeline-->>Server: done (endpoint never runs)
//!     end
//!
//!     Pipeline->>Table: resolve(method, path)
//!     Table-->>Pipeline: candidates (table order)
//!     Pipeline->>Pipeline: bind params, evaluate can_activate
//!
//!     alt Guard rejects
//!         Pipeline->>Handler: error handlers for 403
//!     end
//!
//!     Pipeline->>Handler: endpoint handler
//!     Handler-->>Pipeline: Completion resolved / error raised
//!     Pipeline->>Handler: after hooks (if nothing sent, no error)
//!     Pipeline->>Handler: error handlers (exact code match)
//!     Pipeline-->>Server: outcome
//!     Server-->>Client: buffered response (first send wins)
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use hookrouter::dispatcher::{Completion, Dispatcher};
//! use hookrouter::router::{EndpointDef, MethodSet, RouteTable};
//! use hookrouter::server::{RequestContext, ResponseContext, Server, ServerConfig};
//! use http::Method;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! fn say_hello(req: Arc<RequestContext>, res: ResponseContext, signal: Completion) {
//!     res.send_json(&json!({ "hello": req.query("name").unwrap_or("world") }));
//!     signal.next();
//! }
//!
//! let mut table = RouteTable::new();
//! table
//!     .add_endpoint(EndpointDef::new(
//!         "say_hello",
//!         "/hello",
//!         MethodSet::single(Method::GET),
//!         say_hello,
//!     ))
//!     .expect("valid route");
//!
//! let dispatcher = Dispatcher::new();
//! let server = Server::new(ServerConfig::new(8080), table, dispatcher).expect("valid config");
//! // server.start()?.join();
//! ```
//!
//! ## Dispatch semantics
//!
//! - **First response wins**: the response context carries a one-way
//!   "headers sent" latch. Once any handler transmits, every later phase is
//!   skipped and later sends are no-ops.
//! - **Explicit signaling**: handlers receive a single-use [`dispatcher::Completion`];
//!   they call `next()` to continue or `raise(code, data)` to jump to error
//!   handling. A handler may defer the signal into a spawned coroutine.
//! - **Exact-code error handling**: error handlers match the raised code
//!   exactly; an unmatched code ends the request with no response (the host
//!   maps it to a default 500).
//! - **Startup validation**: invalid path syntax, duplicate (path, method)
//!   registrations and missing listen parameters fail before the listener
//!   binds.
//!
//! ## Runtime Considerations
//!
//! hookrouter uses the `may` coroutine runtime, not tokio or async-std:
//!
//! - each connection is processed in its own coroutine
//! - handler deferral uses `may` channels and coroutines, not futures
//! - stack size is configurable via the `HOOKR_STACK_SIZE` environment
//!   variable (see [`runtime_config`])

pub mod dispatcher;
pub mod ids;
pub mod router;
pub mod runtime_config;
pub mod server;

pub use dispatcher::{
    Completion, DispatchOutcome, DispatchSignal, Dispatcher, Endpoint, ErrorData, ErrorHandler,
    Hook, HookConfig, HookPhase,
};
pub use router::{EndpointDef, MethodSet, RoutePattern, RouteTable, RouterError};
pub use server::{
    AppService, ConfigError, HttpServer, RequestContext, ResponseContext, Server, ServerConfig,
    ServerHandle,
};
