//! Demo server: a small site wiring routes, a standalone endpoint, a
//! request-logging pre hook and a Forbidden error handler.
//!
//! ```bash
//! cargo run --bin hookrouter-demo -- --port 8080
//! curl http://localhost:8080/hello?name=ferris
//! curl -X POST -H 'Content-Type: application/json' \
//!   -d '{"username":"john_doe"}' http://localhost:8080/users/new
//! ```

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use http::Method;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hookrouter::dispatcher::{Completion, Dispatcher, ErrorData, HookConfig};
use hookrouter::router::{EndpointDef, MethodSet, RouteTable};
use hookrouter::runtime_config::RuntimeConfig;
use hookrouter::server::{RequestContext, ResponseContext, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "hookrouter-demo", about = "Run the hookrouter demo server")]
struct Args {
    /// Port to listen on
    #[arg(long, env = "HOOKR_PORT", default_value_t = 8080)]
    port: u16,

    /// Hostname to bind
    #[arg(long, default_value = "0.0.0.0")]
    hostname: String,

    /// Print the route table after registration
    #[arg(long)]
    dump_routes: bool,
}

/// GET /hello - greets the caller, optionally by name.
fn say_hello(req: Arc<RequestContext>, res: ResponseContext, signal: Completion) {
    let name = req.query("name").unwrap_or("world").to_string();
    res.send_json(&json!({ "hello": name }));
    signal.next();
}

/// POST /users/new - echoes the created user back with its path binding.
fn create_new_user(req: Arc<RequestContext>, res: ResponseContext, signal: Completion) {
    let Some(body) = req.body().cloned() else {
        signal.raise(400, json!({ "message": "a JSON body is required" }));
        return;
    };
    res.status(201).send_json(&json!({
        "created": body,
        "route": req.full_path(),
    }));
    signal.next();
}

/// GET /users/:id - requires the caller to identify itself; demonstrates the
/// activation guard path.
fn get_user(req: Arc<RequestContext>, res: ResponseContext, signal: Completion) {
    let id = req.param("id").unwrap_or_default();
    res.send_json(&json!({ "id": id, "name": "John" }));
    signal.next();
}

/// Pre hook: log every request before any endpoint runs.
fn log_request(req: Arc<RequestContext>, _res: ResponseContext, signal: Completion) {
    info!(
        request_id = %req.request_id,
        method = %req.method(),
        path = %req.path(),
        "Incoming request"
    );
    signal.next();
}

/// Error handler for 403: turn activation rejections into a JSON reply.
fn forbidden(error: ErrorData, _req: Arc<RequestContext>, res: ResponseContext, signal: Completion) {
    res.send_json(&json!({
        "error": "Forbidden",
        "details": error.data,
    }));
    signal.next();
}

/// Error handler for 400: malformed input.
fn bad_request(error: ErrorData, _req: Arc<RequestContext>, res: ResponseContext, signal: Completion) {
    res.send_json(&json!({
        "error": "Bad Request",
        "details": error.data,
    }));
    signal.next();
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let runtime = RuntimeConfig::from_env();
    may::config().set_stack_size(runtime.stack_size);

    let mut table = RouteTable::new();
    table
        .add_route(
            "/users",
            vec![
                EndpointDef::new(
                    "create_new_user",
                    "/new",
                    MethodSet::single(Method::POST),
                    create_new_user,
                ),
                EndpointDef::new("get_user", "/:id", MethodSet::single(Method::GET), get_user)
                    .with_can_activate(|req: &RequestContext| req.header("x-api-user").is_some()),
            ],
        )
        .context("registering /users routes")?;
    table
        .add_endpoint(EndpointDef::new(
            "say_hello",
            "/hello",
            MethodSet::only([Method::GET, Method::HEAD]),
            say_hello,
        ))
        .context("registering /hello")?;

    if args.dump_routes {
        table.dump_routes();
    }

    let mut dispatcher = Dispatcher::new();
    dispatcher
        .add_hook(HookConfig::pre("log_request"), log_request)
        .context("registering log_request hook")?;
    dispatcher.add_error_handler(403, "forbidden", forbidden);
    dispatcher.add_error_handler(400, "bad_request", bad_request);

    let config = ServerConfig::new(args.port).with_hostname(&args.hostname);
    let handle = Server::new(config, table, dispatcher)?
        .on_listening(|config| {
            println!("demo server listening on {}:{}", config.hostname, config.port);
        })
        .start()
        .context("starting server")?;

    handle.join().map_err(|_| anyhow!("server panicked"))
}
