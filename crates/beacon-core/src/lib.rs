//! # beacon-core
//!
//! Core types, traits, and abstractions for beacon notification sync.
//!
//! This crate provides the notification data model, the error taxonomy, the
//! collaborator traits (remote repository, change feed, alert sink) and the
//! outward event bus that the sync engine in `beacon-sync` is built on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, MutationKind, SyncEvent};
pub use models::*;
pub use traits::*;
