//! tally-turso - libSQL storage for tally
//!
//! Implements the engine's [`EventCounter`](tally_core::EventCounter),
//! [`CheckpointStore`](tally_core::CheckpointStore) and
//! [`SubjectSource`](tally_core::SubjectSource) on a Turso/libSQL database, either a local
//! embedded file or a remote Turso instance.

mod error;
mod store;

pub use error::{Error, Result};
pub use store::TursoStore;
