//! netloom-controller: the topology orchestration daemon.
//!
//! The controller holds the authoritative model of every topology —
//! computes, projects, nodes, links, drawings — and drives the remote
//! compute agents that actually run the emulators. State changes fan out
//! to observers through the notification hub, exposed over HTTP and
//! WebSocket streams.
//!
//! ## Modules
//!
//! - [`controller`]: Compute/project registries and the probe loop
//! - [`project`]: One topology: nodes, links, drawings, port occupancy
//! - [`node`]: Per-node lifecycle state machine
//! - [`link`]: Link manager: NIO wiring, tunnels, capture
//! - [`notify`]: Notification hub with bounded per-subscriber queues
//! - [`routes`]: HTTP/WebSocket surface
//! - [`config`]: TOML configuration

pub mod config;
pub mod controller;
pub mod error;
pub mod link;
pub mod node;
pub mod notify;
pub mod project;
pub mod routes;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::Config;
pub use controller::{ComputeHandle, Controller};
pub use notify::{NotificationHub, NotificationQueue, DEFAULT_QUEUE_CAPACITY};
pub use state::AppState;
