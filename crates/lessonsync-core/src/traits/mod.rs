//! Collaborator traits defined in `lessonsync-core` and implemented elsewhere.

pub mod clock;
pub mod content;
pub mod identity;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use content::ContentCatalog;
pub use identity::{Identity, IdentityProvider};
pub use store::{Document, DocumentChange, DocumentStore, DocumentWatch, WatchEvent, WatchFilter};
