//! Error types and result definitions for the stratum storage stack.
//!
//! All crates in the workspace share one [`Error`] enum and the [`Result<T>`]
//! alias. Operations that can fail return `Result<T>` and propagate with `?`;
//! context is attached at crate boundaries with [`Error::context`] so that a
//! failure deep in the blob layer still names the page, file, and offset it
//! happened at.
//!
//! Only [`Error::Io`] is ever retried (a bounded number of times, at the file
//! layer). [`Error::LogicalError`] marks invariant violations, which are
//! bugs rather than data problems; callers are expected to treat it as fatal.

mod error;

pub use error::Error;

/// Result alias used across all stratum crates.
pub type Result<T> = std::result::Result<T, Error>;
