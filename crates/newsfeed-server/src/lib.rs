//! News Feed gRPC Server
//!
//! Serves the single bidirectional `Talk` method:
//! - [`service`]: accepts streams and spawns one session engine per stream
//! - [`session`]: the per-stream reader/writer pair
//! - [`config`]: the process configuration file

pub mod config;
pub mod service;
pub mod session;

pub use config::Config;
pub use service::NewsfeedService;
