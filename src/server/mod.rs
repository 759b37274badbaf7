//! # Server Module
//!
//! The server host: owns the listener loop, constructs a request/response
//! context pair per connection, and hands each request to the dispatch
//! pipeline. Startup parameters are validated before the listener binds.
//!
//! Request processing is one coroutine per connection on the `may` runtime;
//! many requests are in flight concurrently, but each
//! [`RequestContext`]/[`ResponseContext`] pair belongs to exactly one
//! dispatch run.

mod config;
mod http_server;
mod request;
mod response;
mod service;

pub use config::{ConfigError, Server, ServerConfig};
pub use http_server::{HttpServer, ServerHandle};
pub use request::{parse_cookies, parse_query_params, RequestContext};
pub use response::ResponseContext;
pub use service::AppService;
