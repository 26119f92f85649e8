//! Reverse proxy configuration
//!
//! Typed Traefik documents and their write-once synchronization to a local
//! or remote filesystem sharing the same layout.

pub mod config;
pub mod sync;

pub use config::ServerRouting;
pub use sync::{dashboard_routing, ConfigTarget, LocalTarget, ProxySynchronizer, RemoteTarget, SyncReport};
