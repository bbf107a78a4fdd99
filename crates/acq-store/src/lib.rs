//! Image storage for acqstore.
//!
//! A [`Storage`] is the keeper of record for image bytes and summary
//! metadata. The datastore layer enforces the dataset lifecycle (freezing,
//! write-once rules, axis validation) and delegates every read and write to a
//! `Storage`, without knowing whether it is memory-resident or file-backed.
//!
//! # Storage Backends
//!
//! All backends implement the [`Storage`] trait:
//!
//! - [`InMemoryStorage`] -- `HashMap`-based store for live acquisitions and tests
//! - file-backed export backends live in the `acq-export` crate
//!
//! # Design Rules
//!
//! 1. One image per coordinate. A backend refuses to overwrite an occupied
//!    coordinate even though the datastore checks first.
//! 2. The store never interprets pixel data.
//! 3. Concurrent reads are always safe; writes at distinct coordinates may
//!    run concurrently.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStorage;
pub use traits::Storage;
