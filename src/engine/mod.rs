//! Booking scheduling and availability materialization.
//!
//! Both halves talk to storage only through the traits in [`crate::store`];
//! neither caches anything between calls.

mod conflict;
mod error;
pub mod expand;
mod materializer;
mod scheduler;

pub use conflict::first_overlap;
pub use error::EngineError;
pub use expand::expand_weekly;
pub use materializer::{Materialized, Materializer};
pub use scheduler::Scheduler;
