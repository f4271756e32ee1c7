pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod service;
pub mod store;
pub mod wal;

pub use config::Config;
pub use engine::{EngineError, Materialized, Materializer, Scheduler};
pub use service::Services;
pub use store::{AvailabilityStore, BookingStore, StoreError, WalStore};
