//! A small server showing routes, middleware, a mounted sub-router,
//! an error handler and the detach/resume primitive.
//!
//! ```bash
//! cargo run --example hello
//! curl http://127.0.0.1:8080/hello
//! curl http://127.0.0.1:8080/api/users/42
//! curl http://127.0.0.1:8080/slow
//! ```

use std::time::Duration;

use mazurka_core::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();

    let mut api = Router::new();
    api.get("/users/:id(\\d+)", |req: &mut Request, res: &mut Response| {
        let id = req.param("id").unwrap_or_default().to_owned();
        res.header("Content-Type", "application/json");
        res.set_body(format!("{{\"user\":{id}}}"));
        RouteResult::Send
    });

    let mut router = Router::new();
    router.wrap("/", |req: &mut Request, _res: &mut Response| {
        tracing::info!(method = %req.method(), path = req.path(), "request");
        RouteResult::Next
    });
    router.get("/hello", |_req: &mut Request, res: &mut Response| {
        res.header("Content-Type", "text/plain");
        res.set_body("Hello, world!");
        RouteResult::Send
    });
    router.get("/slow", |_req: &mut Request, res: &mut Response| {
        // hand the connection back once the work is done; the session
        // performs no I/O in between
        res.set_body("worth the wait\n");
        let resumer = res.detach();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            resumer.resume(RouteResult::Send);
        });
        RouteResult::Detach
    });
    router.mount("/api", api);
    router.err(|_req: &mut Request, res: &mut Response, err: &Error| {
        res.status(500);
        res.set_body(format!("something broke: {err}\n"));
        RouteResult::Send
    });

    Server::new(ServerConfig::default())
        .listen("127.0.0.1:8080", router)?
        .run()
        .await
}
