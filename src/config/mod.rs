//! Configuration for the proxy server

pub mod settings;

pub use settings::*;
