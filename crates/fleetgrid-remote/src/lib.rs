//! fleetgrid-remote: HTTP adapters for FleetGrid's external collaborators.
//!
//! Each adapter implements one of the `fleetgrid-rollout` seams over plain
//! HTTP/1.1 + JSON using the hyper client:
//!
//! - [`HttpFleetRegistry`] → `FleetRegistry`
//! - [`HttpCommandApi`] → `RemoteCommandApi`
//! - [`WebhookNotifier`] → `Notifier`

pub mod client;
pub mod commands;
pub mod error;
pub mod registry;
pub mod webhook;

pub use client::JsonClient;
pub use commands::HttpCommandApi;
pub use error::{RemoteError, RemoteResult};
pub use registry::HttpFleetRegistry;
pub use webhook::WebhookNotifier;
