//! WgMesh CLI
//!
//! Node-side agent: joins networks through the control plane, keeps the
//! local WireGuard configuration in sync, and leaves cleanly.

pub mod agent;
pub mod client;
pub mod commands;
pub mod config;
pub mod interface;
pub mod output;
pub mod sync;

pub use client::HttpNodeService;
pub use config::{ClientConfig, ConfigStore, ServerConfig};
pub use interface::{InterfaceApplier, WgQuickWriter};
pub use sync::{MembershipState, PullOutcome, PullReport, SyncClient};
