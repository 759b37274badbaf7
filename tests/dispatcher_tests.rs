//! Tests for the dispatch pipeline state machine.
//!
//! # Test Coverage
//!
//! - phase ordering: pre hooks -> endpoint -> after hooks -> error handling
//! - first-response-wins across phases
//! - error short-circuits and exact-code error handler matching
//! - activation guards surfacing as Forbidden
//! - deferred completion from a spawned coroutine
//! - at-most-once completion resolution
//! - panic containment

use http::Method;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hookrouter::dispatcher::{
    Completion, DispatchOutcome, Dispatcher, ErrorData, HookConfig,
};
use hookrouter::router::{EndpointDef, MethodSet, RouteTable};
use hookrouter::server::{RequestContext, ResponseContext};

mod common;
use common::test_server::setup_may_runtime;

type Trace = Arc<Mutex<Vec<&'static str>>>;

fn new_trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

fn trace_of(trace: &Trace) -> Vec<&'static str> {
    trace.lock().unwrap().clone()
}

fn request(method: Method, url: &str) -> Arc<RequestContext> {
    Arc::new(RequestContext::new(method, url, HashMap::new(), None))
}

/// Endpoint that records itself and continues without sending.
fn passthrough(
    trace: &Trace,
    tag: &'static str,
) -> impl Fn(Arc<RequestContext>, ResponseContext, Completion) + Send + Sync + 'static {
    let trace = Arc::clone(trace);
    move |_req: Arc<RequestContext>, _res: ResponseContext, signal: Completion| {
        trace.lock().unwrap().push(tag);
        signal.next();
    }
}

#[test]
fn test_phases_run_in_order() {
    setup_may_runtime();
    let trace = new_trace();

    let mut table = RouteTable::new();
    table
        .add_endpoint(EndpointDef::new(
            "hello",
            "/hello",
            MethodSet::single(Method::GET),
            passthrough(&trace, "endpoint"),
        ))
        .unwrap();

    let mut dispatcher = Dispatcher::new();
    dispatcher
        .add_hook(HookConfig::pre("pre_a"), passthrough(&trace, "pre_a"))
        .unwrap();
    dispatcher
        .add_hook(HookConfig::pre("pre_b"), passthrough(&trace, "pre_b"))
        .unwrap();
    dispatcher
        .add_hook(HookConfig::after("after_a"), passthrough(&trace, "after_a"))
        .unwrap();

    let ctx = request(Method::GET, "/hello");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    assert_eq!(outcome, DispatchOutcome::Completed);
    assert_eq!(trace_of(&trace), vec!["pre_a", "pre_b", "endpoint", "after_a"]);
    assert!(!res.headers_sent());
}

#[test]
fn test_first_response_wins() {
    setup_may_runtime();
    let trace = new_trace();

    let mut table = RouteTable::new();
    table
        .add_endpoint(EndpointDef::new(
            "hello",
            "/hello",
            MethodSet::single(Method::GET),
            passthrough(&trace, "endpoint"),
        ))
        .unwrap();

    let mut dispatcher = Dispatcher::new();
    {
        let trace = Arc::clone(&trace);
        dispatcher
            .add_hook(
                HookConfig::pre("responder"),
                move |_req: Arc<RequestContext>, res: ResponseContext, signal: Completion| {
                    trace.lock().unwrap().push("responder");
                    res.send_json(&json!({"early": true}));
                    signal.next();
                },
            )
            .unwrap();
    }
    dispatcher
        .add_hook(HookConfig::pre("late_pre"), passthrough(&trace, "late_pre"))
        .unwrap();
    dispatcher
        .add_hook(HookConfig::after("after"), passthrough(&trace, "after"))
        .unwrap();

    let ctx = request(Method::GET, "/hello");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    // The endpoint and every remaining hook must never execute.
    assert_eq!(outcome, DispatchOutcome::Completed);
    assert_eq!(trace_of(&trace), vec!["responder"]);
    assert!(res.headers_sent());
    let (status, _, body) = res.take_response().unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, serde_json::to_vec(&json!({"early": true})).unwrap());
}

#[test]
fn test_error_short_circuits_current_phase() {
    setup_may_runtime();
    let trace = new_trace();

    let table = RouteTable::new();
    let mut dispatcher = Dispatcher::new();
    {
        let trace = Arc::clone(&trace);
        dispatcher
            .add_hook(
                HookConfig::pre("failing"),
                move |_req: Arc<RequestContext>, _res: ResponseContext, signal: Completion| {
                    trace.lock().unwrap().push("failing");
                    signal.raise(418, json!({"reason": "teapot"}));
                },
            )
            .unwrap();
    }
    dispatcher
        .add_hook(HookConfig::pre("never"), passthrough(&trace, "never"))
        .unwrap();
    dispatcher
        .add_hook(HookConfig::after("after"), passthrough(&trace, "after"))
        .unwrap();

    let ctx = request(Method::GET, "/anything");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    // No handler for 418: the error surfaces as unhandled, and neither the
    // rest of the pre phase nor the after phase ran.
    assert_eq!(
        outcome,
        DispatchOutcome::UnhandledError(ErrorData::new(418, json!({"reason": "teapot"})))
    );
    assert_eq!(trace_of(&trace), vec!["failing"]);
    assert!(!res.headers_sent());
}

#[test]
fn test_error_handler_exact_code_match() {
    setup_may_runtime();
    let trace = new_trace();

    let mut table = RouteTable::new();
    table
        .add_endpoint(EndpointDef::new(
            "secure",
            "/secure",
            MethodSet::single(Method::GET),
            |_req: Arc<RequestContext>, _res: ResponseContext, signal: Completion| {
                signal.raise(403, json!({"message": "denied"}));
            },
        ))
        .unwrap();

    let mut dispatcher = Dispatcher::new();
    {
        let trace = Arc::clone(&trace);
        dispatcher.add_error_handler(
            403,
            "forbidden",
            move |error: ErrorData,
                  _req: Arc<RequestContext>,
                  res: ResponseContext,
                  signal: Completion| {
                trace.lock().unwrap().push("forbidden");
                assert_eq!(error.code, 403);
                // Send without setting a status: the raised code must
                // already be staged.
                res.send_json(&json!({"handled": true}));
                signal.next();
            },
        );
    }
    {
        let trace = Arc::clone(&trace);
        dispatcher.add_error_handler(
            404,
            "not_found",
            move |_error: ErrorData,
                  _req: Arc<RequestContext>,
                  _res: ResponseContext,
                  signal: Completion| {
                trace.lock().unwrap().push("not_found");
                signal.next();
            },
        );
    }

    let ctx = request(Method::GET, "/secure");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    assert_eq!(outcome, DispatchOutcome::Completed);
    assert_eq!(trace_of(&trace), vec!["forbidden"]);
    let (status, _, _) = res.take_response().unwrap();
    assert_eq!(status, 403);
}

#[test]
fn test_activation_guard_rejection() {
    setup_may_runtime();
    let trace = new_trace();

    let mut table = RouteTable::new();
    table
        .add_endpoint(
            EndpointDef::new(
                "guarded",
                "/guarded",
                MethodSet::single(Method::GET),
                passthrough(&trace, "endpoint"),
            )
            .with_can_activate(|req: &RequestContext| req.header("x-api-user").is_some()),
        )
        .unwrap();

    let mut dispatcher = Dispatcher::new();
    let seen_error: Arc<Mutex<Option<ErrorData>>> = Arc::new(Mutex::new(None));
    {
        let seen_error = Arc::clone(&seen_error);
        dispatcher.add_error_handler(
            403,
            "forbidden",
            move |error: ErrorData,
                  _req: Arc<RequestContext>,
                  res: ResponseContext,
                  signal: Completion| {
                *seen_error.lock().unwrap() = Some(error);
                res.send_json(&json!({"error": "Forbidden"}));
                signal.next();
            },
        );
    }

    let ctx = request(Method::GET, "/guarded");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    assert_eq!(outcome, DispatchOutcome::Completed);
    // The endpoint handler never ran.
    assert!(trace_of(&trace).is_empty());

    let error = seen_error.lock().unwrap().clone().unwrap();
    assert_eq!(error.code, 403);
    assert_eq!(error.data["origin"], "canActivate");
    assert_eq!(error.data["fullPath"], "/guarded");

    let (status, _, _) = res.take_response().unwrap();
    assert_eq!(status, 403);
}

#[test]
fn test_unmatched_route_still_runs_after_hooks() {
    setup_may_runtime();
    let trace = new_trace();

    let table = RouteTable::new();
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .add_hook(HookConfig::after("after"), passthrough(&trace, "after"))
        .unwrap();

    let ctx = request(Method::GET, "/nonexistent");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    // An unmatched route is not an error: the endpoint phase has no effect,
    // the after hooks still run, and no response is produced.
    assert_eq!(outcome, DispatchOutcome::Completed);
    assert_eq!(trace_of(&trace), vec!["after"]);
    assert!(!res.headers_sent());
    assert!(res.take_response().is_none());
}

#[test]
fn test_hook_path_filter() {
    setup_may_runtime();
    let trace = new_trace();

    let table = RouteTable::new();
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .add_hook(
            HookConfig::pre("users_only").with_path("/users/:id"),
            passthrough(&trace, "users_only"),
        )
        .unwrap();
    dispatcher
        .add_hook(HookConfig::pre("everywhere"), passthrough(&trace, "everywhere"))
        .unwrap();

    let ctx = request(Method::GET, "/users/42");
    let res = ResponseContext::new();
    dispatcher.dispatch(&table, &ctx, &res);
    assert_eq!(trace_of(&trace), vec!["users_only", "everywhere"]);

    trace.lock().unwrap().clear();
    let ctx = request(Method::GET, "/posts/42");
    let res = ResponseContext::new();
    dispatcher.dispatch(&table, &ctx, &res);
    assert_eq!(trace_of(&trace), vec!["everywhere"]);
}

#[test]
fn test_params_bound_before_endpoint_runs() {
    setup_may_runtime();

    let mut table = RouteTable::new();
    table
        .add_route(
            "/users",
            vec![EndpointDef::new(
                "show_post",
                "/:user_id/posts/:post_id",
                MethodSet::single(Method::GET),
                |req: Arc<RequestContext>, res: ResponseContext, signal: Completion| {
                    assert_eq!(req.param("user_id").as_deref(), Some("abc-123"));
                    assert_eq!(req.param("post_id").as_deref(), Some("post1"));
                    assert_eq!(req.route_path(), "/users");
                    assert_eq!(req.full_path(), "/users/:user_id/posts/:post_id");
                    res.send_json(&json!({"ok": true}));
                    signal.next();
                },
            )],
        )
        .unwrap();

    let dispatcher = Dispatcher::new();
    let ctx = request(Method::GET, "/users/abc-123/posts/post1?debug=true");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    assert_eq!(outcome, DispatchOutcome::Completed);
    assert!(res.headers_sent());
    assert_eq!(ctx.query("debug"), Some("true"));
}

#[test]
fn test_multiple_candidates_run_in_table_order() {
    setup_may_runtime();
    let trace = new_trace();

    let mut table = RouteTable::new();
    table
        .add_endpoint(EndpointDef::new(
            "by_param",
            "/files/:name",
            MethodSet::single(Method::GET),
            passthrough(&trace, "by_param"),
        ))
        .unwrap();
    {
        let trace = Arc::clone(&trace);
        table
            .add_endpoint(EndpointDef::new(
                "by_regex",
                "/files/{^[a-z]+$}",
                MethodSet::single(Method::GET),
                move |_req: Arc<RequestContext>, res: ResponseContext, signal: Completion| {
                    trace.lock().unwrap().push("by_regex");
                    res.send_json(&json!({"served_by": "by_regex"}));
                    signal.next();
                },
            ))
            .unwrap();
    }

    let dispatcher = Dispatcher::new();
    let ctx = request(Method::GET, "/files/readme");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    // The first candidate did not send, so the second ran and responded.
    assert_eq!(outcome, DispatchOutcome::Completed);
    assert_eq!(trace_of(&trace), vec!["by_param", "by_regex"]);
    // The second candidate's binding is the one left on the context.
    assert_eq!(ctx.full_path(), "/files/{^[a-z]+$}");
}

#[test]
fn test_deferred_completion_from_coroutine() {
    setup_may_runtime();

    let mut table = RouteTable::new();
    table
        .add_endpoint(EndpointDef::new(
            "deferred",
            "/deferred",
            MethodSet::single(Method::GET),
            |_req: Arc<RequestContext>, res: ResponseContext, signal: Completion| {
                // Resolve from a coroutine after simulated work; the
                // pipeline must suspend this request until then.
                may::go!(move || {
                    may::coroutine::sleep(std::time::Duration::from_millis(20));
                    res.status(202).send_json(&json!({"deferred": true}));
                    signal.next();
                });
            },
        ))
        .unwrap();

    let dispatcher = Dispatcher::new();
    let ctx = request(Method::GET, "/deferred");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    assert_eq!(outcome, DispatchOutcome::Completed);
    let (status, _, body) = res.take_response().unwrap();
    assert_eq!(status, 202);
    assert_eq!(body, serde_json::to_vec(&json!({"deferred": true})).unwrap());
}

#[test]
fn test_second_resolution_is_noop() {
    setup_may_runtime();
    let trace = new_trace();

    let table = RouteTable::new();
    let mut dispatcher = Dispatcher::new();
    {
        let trace = Arc::clone(&trace);
        dispatcher
            .add_hook(
                HookConfig::pre("double"),
                move |_req: Arc<RequestContext>, _res: ResponseContext, signal: Completion| {
                    trace.lock().unwrap().push("double");
                    signal.next();
                    // Already resolved: this must be ignored.
                    signal.raise(500, json!({"late": true}));
                },
            )
            .unwrap();
    }
    dispatcher
        .add_hook(HookConfig::pre("next_hook"), passthrough(&trace, "next_hook"))
        .unwrap();

    let ctx = request(Method::GET, "/anything");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    // The late raise was dropped; the pipeline continued normally.
    assert_eq!(outcome, DispatchOutcome::Completed);
    assert_eq!(trace_of(&trace), vec!["double", "next_hook"]);
}

#[test]
fn test_handler_without_signal_continues() {
    setup_may_runtime();
    let trace = new_trace();

    let table = RouteTable::new();
    let mut dispatcher = Dispatcher::new();
    {
        let trace = Arc::clone(&trace);
        dispatcher
            .add_hook(
                HookConfig::pre("silent"),
                move |_req: Arc<RequestContext>, _res: ResponseContext, _signal: Completion| {
                    // Returns without resolving; dropping the signal counts
                    // as a plain continue.
                    trace.lock().unwrap().push("silent");
                },
            )
            .unwrap();
    }
    dispatcher
        .add_hook(HookConfig::pre("next_hook"), passthrough(&trace, "next_hook"))
        .unwrap();

    let ctx = request(Method::GET, "/anything");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    assert_eq!(outcome, DispatchOutcome::Completed);
    assert_eq!(trace_of(&trace), vec!["silent", "next_hook"]);
}

#[test]
fn test_error_in_error_handler_ends_unhandled() {
    setup_may_runtime();
    let trace = new_trace();

    let mut table = RouteTable::new();
    table
        .add_endpoint(EndpointDef::new(
            "failing",
            "/failing",
            MethodSet::single(Method::GET),
            |_req: Arc<RequestContext>, _res: ResponseContext, signal: Completion| {
                signal.raise(403, json!({}));
            },
        ))
        .unwrap();

    let mut dispatcher = Dispatcher::new();
    {
        let trace = Arc::clone(&trace);
        dispatcher.add_error_handler(
            403,
            "reraiser",
            move |_error: ErrorData,
                  _req: Arc<RequestContext>,
                  _res: ResponseContext,
                  signal: Completion| {
                trace.lock().unwrap().push("reraiser");
                signal.raise(500, json!({"escalated": true}));
            },
        );
    }
    // A 500 handler exists, but error handling is single-pass: it must not
    // run for the re-raised code.
    dispatcher.add_error_handler(500, "internal", passthrough_error(&trace, "internal"));

    let ctx = request(Method::GET, "/failing");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    assert_eq!(trace_of(&trace), vec!["reraiser"]);
    match outcome {
        DispatchOutcome::UnhandledError(err) => assert_eq!(err.code, 500),
        other => panic!("expected UnhandledError, got {other:?}"),
    }
}

#[test]
fn test_panicking_handler_is_fatal_for_request() {
    setup_may_runtime();

    let mut table = RouteTable::new();
    table
        .add_endpoint(EndpointDef::new(
            "panicker",
            "/panic",
            MethodSet::single(Method::GET),
            |_req: Arc<RequestContext>, _res: ResponseContext, _signal: Completion| {
                panic!("boom");
            },
        ))
        .unwrap();

    let dispatcher = Dispatcher::new();
    let ctx = request(Method::GET, "/panic");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    assert_eq!(
        outcome,
        DispatchOutcome::HandlerPanicked {
            handler: "panicker".to_string()
        }
    );
    assert!(!res.headers_sent());
}

#[test]
fn test_response_sent_takes_precedence_over_error() {
    setup_may_runtime();
    let trace = new_trace();

    let table = RouteTable::new();
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .add_hook(
            HookConfig::pre("send_and_raise"),
            |_req: Arc<RequestContext>, res: ResponseContext, signal: Completion| {
                res.send_json(&json!({"sent": true}));
                signal.raise(500, json!({"ignored": true}));
            },
        )
        .unwrap();
    dispatcher.add_error_handler(
        500,
        "internal",
        passthrough_error(&trace, "internal"),
    );

    let ctx = request(Method::GET, "/anything");
    let res = ResponseContext::new();
    let outcome = dispatcher.dispatch(&table, &ctx, &res);

    // The transmitted response halts the pipeline before the raised error
    // is acted on.
    assert_eq!(outcome, DispatchOutcome::Completed);
    assert!(trace_of(&trace).is_empty());
    assert!(res.headers_sent());
}

fn passthrough_error(
    trace: &Trace,
    tag: &'static str,
) -> impl Fn(ErrorData, Arc<RequestContext>, ResponseContext, Completion) + Send + Sync + 'static {
    let trace = Arc::clone(trace);
    move |_error: ErrorData, _req: Arc<RequestContext>, _res: ResponseContext, signal: Completion| {
        trace.lock().unwrap().push(tag);
        signal.next();
    }
}
