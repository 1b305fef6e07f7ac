//! Live session synchronization: lifecycle, slide pointer, and roster.

pub mod sync;
pub mod view;

pub use sync::{LiveSessionSync, Participation, SessionObserver};
pub use view::SessionView;
