//! Utility functions for the proxy server

pub mod http;
pub mod time;
pub mod logging;

pub use http::*;
pub use time::*;
pub use logging::*;
