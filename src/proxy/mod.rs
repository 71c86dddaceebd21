//! Proxy server module

pub mod connect;
pub mod dispatcher;
pub mod http_relay;
pub mod relay;
pub mod server;
pub mod target;
pub mod upstream;

// Re-exports
pub use dispatcher::{DispatchSettings, Dispatcher};
pub use relay::ByteRelay;
pub use server::ProxyServer;
pub use target::{RequestLine, TargetAuthority};
