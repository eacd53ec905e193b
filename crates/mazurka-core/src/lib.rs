//! Asynchronous HTTP/1 building blocks.
//!
//! The crate is organized around a small set of composable pieces:
//!
//! - [`proto`] — the parser/serializer contracts and a concrete HTTP/1
//!   implementation of both.
//! - [`io`] — composed read/write operations that drive a parser or
//!   serializer against an asynchronous byte stream, plus body-stream
//!   adapters that expose a byte-stream interface mid-message.
//! - [`router`] — URL-pattern matching with ordered middleware, route
//!   handlers, error-handling chains and mid-chain detach/resume.
//! - [`session`] — the per-connection read, route, write, keep-alive loop.
//! - [`server`] — a listening-port fan-out over a fixed pool of workers,
//!   and the process scaffold (signals, shutdown timer, services).
//!
//! A minimal server:
//!
//! ```rust,no_run
//! use mazurka_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mazurka_core::Error> {
//!     init_logging();
//!     let mut router = Router::new();
//!     router.get("/hello", |_req: &mut Request, res: &mut Response| {
//!         res.set_body("Hello, world!");
//!         RouteResult::Send
//!     });
//!     Server::new(ServerConfig::default())
//!         .listen("0.0.0.0:8080", router)?
//!         .run()
//!         .await
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod proto;
pub mod router;
pub mod server;
pub mod session;
pub mod store;
pub mod testing;

pub use config::ServerConfig;
pub use error::Error;

pub mod prelude {
    pub use crate::config::ServerConfig;
    pub use crate::error::Error;
    pub use crate::logging::init_logging;
    pub use crate::proto::http1::{Method, StatusCode, Version};
    pub use crate::router::{Request, Response, RouteResult, Router};
    pub use crate::server::Server;
}
