//! Utilities module
//!
//! Error taxonomy, logging helpers and multipart field lookup

pub mod error;
pub mod logging;
pub mod multipart;
