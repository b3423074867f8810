//! HTTP surface: health check and the socket endpoint

pub mod middleware;
pub mod routes;

pub use routes::build_router;
