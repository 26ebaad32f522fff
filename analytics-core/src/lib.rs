mod adapter;
mod cluster;
mod config;
mod context;
mod credential;
mod deserializer;
mod dispatcher;
mod error;
mod http;
mod json_stream;
mod metadata;
mod reader;
mod request;
mod resolver;
mod result;
mod transport;
mod util;

pub use adapter::*;
pub use cluster::*;
pub use config::*;
pub use context::*;
pub use credential::*;
pub use deserializer::*;
pub use dispatcher::*;
pub use error::*;
pub use http::*;
pub use json_stream::*;
pub use metadata::*;
pub use reader::StreamState;
pub use request::*;
pub use resolver::*;
pub use result::*;
pub use transport::*;
pub use util::*;
pub mod stream {
    pub use ::futures::stream::*;
}
pub use ::futures::future;
