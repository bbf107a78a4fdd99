//! Foundation types for acqstore.
//!
//! This crate provides the value types shared by every other acqstore crate:
//! where an image sits in the acquisition, the image itself, and the
//! dataset-wide summary that travels with it.
//!
//! # Key Types
//!
//! - [`Coords`] -- Named-axis position of one image, plus terminal-axis markers
//! - [`Image`] -- Opaque pixel payload and per-image metadata, keyed by `Coords`
//! - [`SummaryMetadata`] -- Dataset-wide description, including the axis order
//! - [`DatastoreId`] -- UUID v7 identifier used to tell datastores apart in logs

pub mod coords;
pub mod error;
pub mod identity;
pub mod image;
pub mod summary;

pub use coords::{Coords, CoordsBuilder, CHANNEL, STAGE_POSITION, TIME, UNDEFINED, Z};
pub use error::TypeError;
pub use identity::DatastoreId;
pub use image::Image;
pub use summary::SummaryMetadata;
