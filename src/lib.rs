//! Realtime notification and discussion sync for the LMS client.
//!
//! Keeps a local view of server-pushed events consistent under an
//! unreliable push transport:
//!
//! - [`transport`]: STOMP over WebSocket with fixed-delay reconnect
//! - [`notifications`]: deduplicating notification list + unread count
//! - [`discussion`]: per-course message tree, re-fetched on every change
//! - [`sync`]: fallback polling and the coordinators that own each scope
//! - [`api`]: the REST collaborator the engines call into

pub mod api;
pub mod config;
pub mod discussion;
pub mod error;
pub mod notifications;
pub mod session;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{Result, SyncError};
