//! Clipper Account Merge
//!
//! Atomically folds an unclaimed account into a claimed one: content,
//! votes, favorites, comments, follows, watch history, preferences and an
//! active subscription change owner, and the source account is retired.
//!
//! # Modules
//!
//! - [`core_types`] - Core type definitions (AccountId)
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool
//! - [`merge`] - The merge engine

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod db;
pub mod logging;
pub mod merge;

// Convenient re-exports at crate root
pub use core_types::AccountId;
pub use merge::{AccountMergeService, MergeError, MergeResult};
