//! Web of Needs agreement aggregation
//!
//! The owner application computes, per connection, which events are agreed,
//! pending or being cancelled. This crate fetches those sets through an
//! [`AgreementSource`], makes them consistent, resolves every entry to the
//! copy of the event that should be displayed, and produces an
//! [`AgreementSnapshot`].
//!
//! The same view can be derived purely from the local message graph with
//! [`local_snapshot`]; both converge once all referenced messages are
//! loaded.

mod aggregator;
pub mod error;
mod snapshot;
mod source;

pub use aggregator::{
    partition, prune_withdrawn, AgreementAggregator, Reconciliation, DEFAULT_MAX_DEPTH,
};
pub use error::{Error, Result};
pub use snapshot::{local_snapshot, AgreementRef, AgreementSnapshot};
pub use source::{AgreementProtocolUris, AgreementSource};
