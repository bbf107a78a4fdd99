//! Event bus for acqstore.
//!
//! Every mutation of a datastore is announced through an [`EventBus`].
//! Delivery is synchronous and deterministic: listeners run on the
//! publishing thread, lowest priority value first, in registration order
//! within a priority. A listener that fails or panics is logged and skipped;
//! the remaining listeners still see the event.

pub mod bus;
pub mod error;

pub use bus::{EventBus, Listener, ListenerId, PublishReport, DEFAULT_PRIORITY};
pub use error::ListenerError;
