//! # lessonsync-core
//!
//! Core crate for LessonSync. Contains the collaborator traits (document
//! store, identity provider, content catalog, clock), configuration schemas,
//! typed identifiers, and the unified error system.
//!
//! This crate has **no** internal dependencies on other LessonSync crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
