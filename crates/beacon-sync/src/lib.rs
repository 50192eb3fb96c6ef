//! # beacon-sync
//!
//! Real-time notification synchronization for one signed-in user.
//!
//! This crate provides:
//! - A local notification store with an exact unread counter
//! - A feed subscriber that seeds the store and follows the live change feed
//! - A mutation gateway for mark-read and delete operations (write, then apply)
//! - An engine task tying them together, published as a watchable snapshot
//! - An in-memory backend for tests and demos
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use beacon_sync::{CurrentUser, EngineBuilder, InMemoryBackend, SyncConfig, TracingAlerts};
//! use tokio::sync::watch;
//!
//! let backend = InMemoryBackend::new();
//! let (identity_tx, identity_rx) = watch::channel(None);
//!
//! let handle = EngineBuilder::new(Arc::new(backend.clone()), Arc::new(backend), identity_rx)
//!     .with_config(SyncConfig::from_env())
//!     .with_alerts(TracingAlerts)
//!     .build()
//!     .start();
//!
//! // Sign in: the engine seeds the store and opens the live subscription
//! identity_tx.send(Some(CurrentUser::new(user_id)))?;
//!
//! // React to state changes
//! let mut state = handle.watch();
//! state.changed().await?;
//! println!("unread: {}", state.borrow().unread_count);
//!
//! // Mutations are pessimistic: remote write first, then the local store
//! handle.gateway().mark_all_as_read().await?;
//!
//! handle.shutdown().await?;
//! ```

pub mod alerts;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod memory;
pub mod retry;
pub mod store;
pub mod subscriber;

// Re-export core types
pub use beacon_core::*;

pub use alerts::{RecordedAlert, RecordingAlerts, TracingAlerts};
pub use config::SyncConfig;
pub use engine::{EngineBuilder, EngineHandle, NotificationEngine};
pub use gateway::MutationGateway;
pub use memory::{BackendCall, InMemoryBackend};
pub use retry::RetryPolicy;
pub use store::{InsertOutcome, NotificationStore, UpdateOutcome};
pub use subscriber::{FeedSubscriber, LocalMutation, SessionSetup, SetupOutcome};
