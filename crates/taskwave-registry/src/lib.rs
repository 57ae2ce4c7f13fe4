//! The Task Registry: a file-backed, single-writer, atomically-persisted
//! state store, plus the pure Level Controller predicates that read it.
//!
//! - [`store`] — [`Registry`], the CAS claim/update API, and the on-disk
//!   `<feature>.json` / `.bak` / `.tmp` / `.lock` layout.
//! - [`level`] — `can_level_start`/`is_level_resolved`/`is_level_success`/
//!   `next_level`, pure functions over a [`types::RegistryDocument`]
//!   snapshot.
//! - [`types`] — the shared status/event data model.

pub mod error;
pub mod level;
pub mod store;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use store::Registry;
pub use types::{
    Event, LevelState, LevelStatus, RegistryDocument, TaskStatus, WorkerStatus, DEFAULT_MAX_RETRIES,
};
