//! File-backed storage backends for acqstore exports.
//!
//! Both backends implement [`acq_store::Storage`], so the save pipeline can
//! replay a live dataset into them through the ordinary datastore contract.
//!
//! # Formats
//!
//! - **Image stack** (`.acqstack`): a single file. A magic header, then one
//!   CRC-checked frame per image or summary update, closed by an end frame
//!   when the datastore freezes.
//! - **Plane series** (`.plane` + `metadata.json`): one framed file per
//!   image, named after its coordinates, plus the summary as JSON.
//!
//! Frames share one encoding ([`frame`]): `[u32 length][u32 CRC32][payload]`,
//! the payload being bincode.

pub mod config;
pub mod frame;
pub mod index;
pub mod series;
pub mod stack;

pub use config::{ExportConfig, SyncMode};
pub use frame::Frame;
pub use index::PlaneIndex;
pub use series::PlaneSeriesStorage;
pub use stack::StackFileStorage;
