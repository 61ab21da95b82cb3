//! Lintel - hierarchical permission reconciler
//!
//! Keeps role assignments inherited down an externally owned directory tree
//! correct while directory nodes are created, moved and deleted.
//!
//! ## Components
//!
//! - **Watcher** ([`nats`]): directory lifecycle events as a bounded, cancellable stream
//! - **Directory client** ([`directory`]): ancestor chains from the directory service
//! - **Permission store** ([`store`]): roles, assignments, inherited links, node cursors
//! - **Reconciler** ([`reconciler`]): per-event link deltas and full resync
//! - **Controller** ([`controller`]): subscription lifecycle, keyed workers, resync timer

pub mod config;
pub mod controller;
pub mod directory;
pub mod nats;
pub mod reconciler;
pub mod store;
pub mod types;

pub use config::Args;
pub use controller::{spawn_controller, Controller, ControllerConfig};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use types::{LintelError, Result};
