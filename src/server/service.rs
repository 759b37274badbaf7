//! The listener-facing service: builds the per-request contexts, runs the
//! dispatch pipeline and flushes the buffered response to the wire.

use may_minihttp::{HttpService, Request, Response};
use serde_json::json;
use std::io;
use std::sync::Arc;
use tracing::{error, warn};

use super::request::read_request;
use super::response::{write_json_error, write_response, ResponseContext};
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::router::RouteTable;

/// One service instance handles every connection; the route table and
/// dispatcher registries are immutable after startup and shared by all
/// in-flight requests.
#[derive(Clone)]
pub struct AppService {
    pub table: Arc<RouteTable>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppService {
    #[must_use]
    pub fn new(table: Arc<RouteTable>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { table, dispatcher }
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let ctx = Arc::new(read_request(req));
        let reply = ResponseContext::new();

        match self.dispatcher.dispatch(&self.table, &ctx, &reply) {
            DispatchOutcome::Completed => {}
            DispatchOutcome::UnhandledError(err) => {
                warn!(
                    request_id = %ctx.request_id,
                    code = err.code,
                    "Request raised an error no handler resolves"
                );
                if !reply.headers_sent() {
                    // Documented extension: map the silent-failure condition
                    // to a default 500 rather than dropping the client.
                    write_json_error(
                        res,
                        500,
                        json!({ "error": "Unhandled application error", "code": err.code }),
                    );
                    return Ok(());
                }
            }
            DispatchOutcome::HandlerPanicked { handler } => {
                error!(
                    request_id = %ctx.request_id,
                    handler = %handler,
                    "Handler panicked - returning 500"
                );
                if !reply.headers_sent() {
                    write_json_error(res, 500, json!({ "error": "Handler panicked" }));
                    return Ok(());
                }
            }
        }

        if let Some((status, headers, body)) = reply.take_response() {
            write_response(res, status, &headers, body);
        }
        // No handler produced a response: nothing is written and the
        // transport's default empty reply goes out.
        Ok(())
    }
}
