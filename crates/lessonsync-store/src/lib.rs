//! # lessonsync-store
//!
//! Document store implementations for LessonSync:
//!
//! - **memory**: In-process store backed by [dashmap](https://crates.io/crates/dashmap)
//!   with a broadcast change feed
//! - **fault-injection**: wrapper that fails or stalls selected operations,
//!   used to exercise the degrade-and-recover paths
//!
//! The provider is selected at runtime based on configuration.

#[cfg(feature = "fault-injection")]
pub mod fault;
pub mod keys;
#[cfg(feature = "memory")]
pub mod memory;
pub mod provider;

pub use provider::StoreManager;
