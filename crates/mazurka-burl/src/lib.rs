//! A curl-like HTTP/1 client built on the mazurka I/O core: composed
//! read/write operations drive the message coder against a plain or
//! TLS connection, and the response body streams straight to the
//! output.

pub mod fetch;

pub use fetch::{Options, RequestBody, fetch};
