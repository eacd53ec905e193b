use std::sync::{Arc, Mutex};

use super::*;
use crate::proto::http1::{Method, RequestHead, SerializerConfig};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn taken(l: &Log) -> Vec<&'static str> {
    l.lock().unwrap().clone()
}

fn request(method: Method, target: &str) -> Request {
    let mut req = Request::new();
    req.prepare(RequestHead::new(method, target), Vec::new())
        .unwrap();
    req
}

fn response() -> Response {
    Response::new(SerializerConfig::default())
}

fn visits(l: &Log, name: &'static str, rv: fn() -> RouteResult) -> impl Fn(&mut Request, &mut Response) -> RouteResult + use<> {
    let l = l.clone();
    move |_req: &mut Request, _res: &mut Response| {
        l.lock().unwrap().push(name);
        rv()
    }
}

#[test]
fn declaration_order() {
    let l = log();
    let mut r = Router::new();
    r.wrap("/", visits(&l, "A", || RouteResult::Next));
    r.get("/x", visits(&l, "B", || RouteResult::Next));
    r.all("/x", visits(&l, "C", || RouteResult::Next));

    let mut req = request(Method::Get, "/x");
    let mut res = response();
    let rv = r.dispatch(&mut req, &mut res);
    assert!(matches!(rv, RouteResult::Next));
    assert_eq!(taken(&l), ["A", "B", "C"]);
}

#[test]
fn next_route_skips_rest_of_layer() {
    // B and C share the /x layer; next_route from B skips C but the
    // response is written by no one
    let l = log();
    let mut r = Router::new();
    r.wrap("/", visits(&l, "A", || RouteResult::Next));
    r.get("/x", visits(&l, "B", || RouteResult::NextRoute));
    r.all("/x", visits(&l, "C", || RouteResult::Send));

    let mut req = request(Method::Get, "/x");
    let mut res = response();
    let rv = r.dispatch(&mut req, &mut res);
    assert!(matches!(rv, RouteResult::Next));
    assert_eq!(taken(&l), ["A", "B"]);
}

#[test]
fn send_stops_traversal() {
    let l = log();
    let mut r = Router::new();
    r.wrap("/", visits(&l, "A", || RouteResult::Next));
    r.get("/x", visits(&l, "B", || RouteResult::Send));
    r.all("/x", visits(&l, "C", || RouteResult::Send));

    let mut req = request(Method::Get, "/x");
    let mut res = response();
    let rv = r.dispatch(&mut req, &mut res);
    assert!(matches!(rv, RouteResult::Send));
    assert_eq!(taken(&l), ["A", "B"]);
}

#[test]
fn method_filtering() {
    let l = log();
    let mut r = Router::new();
    r.get("/x", visits(&l, "get", || RouteResult::Send));
    r.post("/x", visits(&l, "post", || RouteResult::Send));

    let mut req = request(Method::Post, "/x");
    let mut res = response();
    let rv = r.dispatch(&mut req, &mut res);
    assert!(matches!(rv, RouteResult::Send));
    assert_eq!(taken(&l), ["post"]);
}

#[test]
fn all_matches_custom_methods() {
    let l = log();
    let mut r = Router::new();
    r.all("/x", visits(&l, "all", || RouteResult::Send));

    let mut req = request(Method::Other("PURGE".into()), "/x");
    let mut res = response();
    assert!(matches!(r.dispatch(&mut req, &mut res), RouteResult::Send));
    assert_eq!(taken(&l), ["all"]);
}

#[test]
fn unmatched_path_returns_next() {
    let l = log();
    let mut r = Router::new();
    r.get("/x", visits(&l, "B", || RouteResult::Send));

    let mut req = request(Method::Get, "/nope");
    let mut res = response();
    assert!(matches!(r.dispatch(&mut req, &mut res), RouteResult::Next));
    assert!(taken(&l).is_empty());
}

#[test]
fn count_equals_positions_visited_on_fallthrough() {
    let mut sub = Router::new();
    sub.get("/a", |_: &mut Request, _: &mut Response| RouteResult::Next);
    sub.wrap("/", |_: &mut Request, _: &mut Response| RouteResult::Next);

    let mut r = Router::new();
    r.wrap("/", |_: &mut Request, _: &mut Response| RouteResult::Next);
    r.mount("/", sub);
    r.get("/y", |_: &mut Request, _: &mut Response| RouteResult::Next);

    // 1 (wrap) + 1 (mount itself) + 2 (inside sub) + 1 (route) = 5
    assert_eq!(r.count(), 5);

    let mut req = request(Method::Get, "/y");
    let mut res = response();
    let rv = r.dispatch(&mut req, &mut res);
    assert!(matches!(rv, RouteResult::Next));
    assert_eq!(res.pos, r.count());
}

#[test]
fn middleware_prefix_adjusts_base_path() {
    let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let mut r = Router::new();
    r.wrap("/api", move |req: &mut Request, _res: &mut Response| {
        seen2
            .lock()
            .unwrap()
            .push((req.base_path().to_owned(), req.path().to_owned()));
        RouteResult::Next
    });

    let mut req = request(Method::Get, "/api/users");
    let mut res = response();
    r.dispatch(&mut req, &mut res);
    assert_eq!(
        taken_pairs(&seen),
        [("/api".to_owned(), "/users".to_owned())]
    );
    // path state restored after the layer
    assert_eq!(req.base_path(), "");
    assert_eq!(req.path(), "/api/users");
}

fn taken_pairs(l: &Arc<Mutex<Vec<(String, String)>>>) -> Vec<(String, String)> {
    l.lock().unwrap().clone()
}

#[test]
fn sub_router_sees_relative_path() {
    let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let mut sub = Router::new();
    sub.get("/users/:id", move |req: &mut Request, _res: &mut Response| {
        seen2.lock().unwrap().push((
            req.base_path().to_owned(),
            req.param("id").unwrap_or("").to_owned(),
        ));
        RouteResult::Send
    });

    let mut r = Router::new();
    r.mount("/api", sub);

    let mut req = request(Method::Get, "/api/users/42");
    let mut res = response();
    let rv = r.dispatch(&mut req, &mut res);
    assert!(matches!(rv, RouteResult::Send));
    assert_eq!(
        taken_pairs(&seen),
        [("/api/users/42".to_owned(), "42".to_owned())]
    );
}

#[test]
fn error_handler_downgrades() {
    let l = log();
    let mut r = Router::new();
    let l2 = l.clone();
    r.get("/x", move |_req: &mut Request, _res: &mut Response| {
        l2.lock().unwrap().push("boom");
        RouteResult::Err(Error::Handler("boom".into()))
    });
    let l3 = l.clone();
    r.get("/x", move |_req: &mut Request, _res: &mut Response| {
        l3.lock().unwrap().push("skipped");
        RouteResult::Send
    });
    let l4 = l.clone();
    r.err(move |_req: &mut Request, res: &mut Response, err: &Error| {
        l4.lock().unwrap().push("err");
        assert!(matches!(err, Error::Handler(_)));
        res.status(502);
        RouteResult::Send
    });

    let mut req = request(Method::Get, "/x");
    let mut res = response();
    let rv = r.dispatch(&mut req, &mut res);
    assert!(matches!(rv, RouteResult::Send));
    assert_eq!(res.head.status, 502);
    // the error skipped the rest of the /x layer
    assert_eq!(taken(&l), ["boom", "err"]);
}

#[test]
fn unhandled_error_surfaces() {
    let mut r = Router::new();
    r.get("/x", |_: &mut Request, _: &mut Response| {
        RouteResult::Err(Error::Handler("boom".into()))
    });

    let mut req = request(Method::Get, "/x");
    let mut res = response();
    let rv = r.dispatch(&mut req, &mut res);
    assert!(matches!(rv, RouteResult::Err(Error::Handler(_))));
}

#[test]
fn error_mode_skips_routes_and_middleware() {
    let l = log();
    let mut r = Router::new();
    r.wrap("/", visits(&l, "A", || {
        RouteResult::Err(Error::Handler("x".into()))
    }));
    r.wrap("/", visits(&l, "mw", || RouteResult::Next));
    r.get("/x", visits(&l, "route", || RouteResult::Send));
    let l2 = l.clone();
    r.err(move |_req: &mut Request, _res: &mut Response, _e: &Error| {
        l2.lock().unwrap().push("err");
        RouteResult::Send
    });

    let mut req = request(Method::Get, "/x");
    let mut res = response();
    let rv = r.dispatch(&mut req, &mut res);
    assert!(matches!(rv, RouteResult::Send));
    assert_eq!(taken(&l), ["A", "err"]);
}

#[test]
fn error_handler_can_replace_error() {
    let mut r = Router::new();
    r.get("/x", |_: &mut Request, _: &mut Response| {
        RouteResult::Err(Error::Handler("first".into()))
    });
    r.err(|_req: &mut Request, _res: &mut Response, _e: &Error| {
        RouteResult::Err(Error::Handler("second".into()))
    });

    let mut req = request(Method::Get, "/x");
    let mut res = response();
    match r.dispatch(&mut req, &mut res) {
        RouteResult::Err(Error::Handler(msg)) => assert_eq!(msg, "second"),
        rv => panic!("unexpected {rv:?}"),
    }
}

#[test]
fn detach_returns_immediately() {
    let l = log();
    let slot: Arc<Mutex<Option<Resumer>>> = Arc::new(Mutex::new(None));
    let slot2 = slot.clone();
    let l2 = l.clone();

    let mut r = Router::new();
    r.wrap("/", visits(&l, "A", || RouteResult::Next));
    r.wrap("/", move |_req: &mut Request, res: &mut Response| {
        l2.lock().unwrap().push("B");
        *slot2.lock().unwrap() = Some(res.detach());
        RouteResult::Detach
    });
    r.wrap("/", visits(&l, "C", || RouteResult::Next));

    let mut req = request(Method::Get, "/x");
    let mut res = response();
    let rv = r.dispatch(&mut req, &mut res);
    assert!(matches!(rv, RouteResult::Detach));
    assert!(res.was_detached());
    // C has not run
    assert_eq!(taken(&l), ["A", "B"]);

    // resuming with send produces send without running C
    let rv = r.resume(&mut req, &mut res, RouteResult::Send);
    assert!(matches!(rv, RouteResult::Send));
    assert_eq!(taken(&l), ["A", "B"]);
    drop(slot);
}

#[test]
fn resume_with_next_continues_after_detach_point() {
    let l = log();
    let mut r = Router::new();
    r.wrap("/", visits(&l, "A", || RouteResult::Next));
    let l2 = l.clone();
    r.wrap("/", move |_req: &mut Request, res: &mut Response| {
        l2.lock().unwrap().push("B");
        let _resumer = res.detach();
        RouteResult::Detach
    });
    r.wrap("/", visits(&l, "C", || RouteResult::Send));

    let mut req = request(Method::Get, "/x");
    let mut res = response();
    assert!(matches!(
        r.dispatch(&mut req, &mut res),
        RouteResult::Detach
    ));

    let rv = r.resume(&mut req, &mut res, RouteResult::Next);
    assert!(matches!(rv, RouteResult::Send));
    // A does not run again; C runs exactly once
    assert_eq!(taken(&l), ["A", "B", "C"]);
}

#[test]
fn resume_with_error_reaches_error_handlers() {
    let l = log();
    let mut r = Router::new();
    let l2 = l.clone();
    r.wrap("/", move |_req: &mut Request, res: &mut Response| {
        l2.lock().unwrap().push("B");
        let _resumer = res.detach();
        RouteResult::Detach
    });
    let l3 = l.clone();
    r.err(move |_req: &mut Request, _res: &mut Response, e: &Error| {
        l3.lock().unwrap().push("err");
        assert!(matches!(e, Error::Handler(_)));
        RouteResult::Send
    });

    let mut req = request(Method::Get, "/x");
    let mut res = response();
    assert!(matches!(
        r.dispatch(&mut req, &mut res),
        RouteResult::Detach
    ));

    let rv = r.resume(
        &mut req,
        &mut res,
        RouteResult::Err(Error::Handler("late failure".into())),
    );
    assert!(matches!(rv, RouteResult::Send));
    assert_eq!(taken(&l), ["B", "err"]);
}

#[test]
fn resume_restores_path_state_through_sub_router() {
    let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));

    let mut sub = Router::new();
    sub.wrap("/", |_req: &mut Request, res: &mut Response| {
        let _resumer = res.detach();
        RouteResult::Detach
    });
    let seen2 = seen.clone();
    sub.wrap("/", move |req: &mut Request, _res: &mut Response| {
        seen2
            .lock()
            .unwrap()
            .push((req.base_path().to_owned(), req.path().to_owned()));
        RouteResult::Send
    });

    let mut r = Router::new();
    r.mount("/api", sub);

    let mut req = request(Method::Get, "/api/users");
    let mut res = response();
    assert!(matches!(
        r.dispatch(&mut req, &mut res),
        RouteResult::Detach
    ));

    let rv = r.resume(&mut req, &mut res, RouteResult::Next);
    assert!(matches!(rv, RouteResult::Send));
    // base_path/path at the handler after the detach point match the
    // original dispatch
    assert_eq!(
        taken_pairs(&seen),
        [("/api".to_owned(), "/users".to_owned())]
    );
}

#[test]
#[should_panic(expected = "middleware cannot return next_route")]
fn middleware_next_route_panics() {
    let mut r = Router::new();
    r.wrap("/", |_: &mut Request, _: &mut Response| {
        RouteResult::NextRoute
    });
    let mut req = request(Method::Get, "/x");
    let mut res = response();
    r.dispatch(&mut req, &mut res);
}

#[test]
#[should_panic(expected = "cannot resume with detach")]
fn resume_with_detach_panics() {
    let mut r = Router::new();
    r.wrap("/", |_req: &mut Request, res: &mut Response| {
        let _resumer = res.detach();
        RouteResult::Detach
    });
    let mut req = request(Method::Get, "/x");
    let mut res = response();
    assert!(matches!(
        r.dispatch(&mut req, &mut res),
        RouteResult::Detach
    ));
    r.resume(&mut req, &mut res, RouteResult::Detach);
}

#[test]
#[should_panic(expected = "resume without a prior detach")]
fn resume_without_detach_panics() {
    let r = Router::new();
    let mut req = request(Method::Get, "/x");
    let mut res = response();
    res.begin_dispatch();
    r.resume(&mut req, &mut res, RouteResult::Next);
}
