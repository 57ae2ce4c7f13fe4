//! Task graph parsing, validation, and worker assignment.
//!
//! - [`validate`] — decode a task graph document and check every structural
//!   invariant (known prerequisites, acyclic, level-ordered, exclusive file
//!   ownership per level).
//! - [`assign`] — compute a [`Plan`] mapping each task to a worker, capped
//!   to the graph's maximum per-level parallelism.
//!
//! All public types are `Send + Sync` and contain no interior mutability;
//! a [`Graph`] and [`Plan`] are immutable once constructed.

pub mod assign;
pub mod error;
pub mod types;
pub mod validate;

pub use assign::assign as assign_workers;
pub use error::{GraphError, GraphResult};
pub use types::{FileTouches, Graph, GraphDocument, Plan, Task, VerificationSpec};
pub use validate::{parse, parse_and_validate, validate};
