//! Built-in reconciliation tasks.

pub mod projection;
pub mod roster;

pub use projection::PresenceProjectionTask;
pub use roster::RosterPruneTask;
