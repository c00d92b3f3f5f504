//! Middleware module
//!
//! Request id assignment and request logging

pub mod logging;

pub use logging::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
