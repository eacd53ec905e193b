//! HTTP/1.x wire coder: message types, an incremental parser and a
//! serializer, all implementing the contracts in [`crate::proto`].

mod message;
mod parser;
mod serializer;

pub use message::{
    Body, HeaderMap, Method, RequestHead, ResponseHead, StatusCode, Version, reason_phrase,
};
pub use parser::{
    HeadDecode, Http1Parser, MAX_HEADERS, ParserConfig, RequestParser, ResponseParser,
};
pub use serializer::{HeadEncode, Http1Serializer, SerializerConfig};
