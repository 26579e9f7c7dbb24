//! Load-state tracking for remote Web of Needs resources
//!
//! Every atom, connection container, connection and external dataset the
//! client touches gets a [`ProcessEntry`] recording where it is in its fetch
//! cycle:
//!
//! ```text
//! unrequested/toLoad ──► loading ──► loaded
//!                            └─────► failedToLoad
//! ```
//!
//! [`ProcessState::start_load`] is idempotent while a fetch is in flight, so
//! at most one fetch per resource is ever outstanding. Completions are only
//! applied while the entry is still loading; results arriving after a reset
//! or deletion are dropped.
//!
//! # Gone resources
//!
//! A 410 answer for an atom, connection or connection container deletes the
//! entity (cascading from an atom to its container and connections) instead
//! of recording a failure.
//!
//! # Sub-resources
//!
//! Connections carry three independently tracked data sets (petri net data,
//! agreement data, agreement dataset) with a failure counter each. The
//! [`RetryPolicy`] caps how many consecutive failures are retried.

mod entry;
mod state;

pub use entry::{
    AtomProcess, ConnectionProcess, LoadPhase, ProcessEntry, StatusInfo, SubResource,
    SubResourceProcess, GONE,
};
pub use state::{FailureOutcome, LoadStart, ProcessState, ResourceKind, RetryPolicy};
