//! HTTP implementation of the extraction backend contract.
//!
//! Pure request/response: every call carries its own credentials and the
//! client keeps no state beyond the connection pool.

pub mod http;

pub use http::HttpBackend;
