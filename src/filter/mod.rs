//! Host-based request filtering

pub mod blocklist;

pub use blocklist::BlockList;
