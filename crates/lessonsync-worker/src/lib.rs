//! Background reconciliation for LessonSync.
//!
//! This crate provides:
//! - A runner that sweeps registered tasks on a fixed interval
//! - The presence projection task that keeps `users/{id}` online flags in
//!   step with presence records, with retry
//! - The roster pruning task that drops stale live session entries
//! - An event-driven listener that projects presence as it changes

pub mod listener;
pub mod retry;
pub mod runner;
pub mod task;
pub mod tasks;

pub use listener::ProjectionListener;
pub use retry::RetryPolicy;
pub use runner::ReconcileRunner;
pub use task::{ReconcileTask, TaskError};
