//! HTTP surface: the admission middleware and the server that mounts it.

mod middleware;
mod server;

pub use middleware::{
    enforce, ClientIdentity, API_KEY_HEADER, FORWARDED_FOR_HEADER, RATE_LIMITED_BODY,
    STORE_FAILURE_BODY,
};
pub use server::{router, serve_listener, HttpServer, ALLOWED_BODY};
