//! The server side: a listening-port fan-out over a fixed worker pool,
//! and the process scaffold that owns services, signals and the timed
//! graceful shutdown.

pub mod listener;
mod scaffold;

pub use listener::{Listener, ServerContext};
pub use scaffold::{Server, ServerPart};
