//! Storage seam for the engine.
//!
//! The scheduler and materializer only ever talk to these traits. Every call
//! takes the caller's cancellation token; a cancelled token fails the call with
//! [`StoreError::Cancelled`] before anything is written.

mod compactor;
mod wal_store;
mod writer;

pub use compactor::run_compactor;
pub use wal_store::WalStore;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug)]
pub enum StoreError {
    /// No row matched the id (and scope, where one applies).
    NotFound(Ulid),
    /// The row exists but the acting user may not touch it.
    Forbidden(Ulid),
    /// A conditional write lost to an existing, overlapping booking.
    Overlap(Ulid),
    Cancelled,
    Journal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "no rows for {id}"),
            StoreError::Forbidden(id) => write!(f, "{id} is owned by another user"),
            StoreError::Overlap(id) => write!(f, "overlaps booking {id}"),
            StoreError::Cancelled => write!(f, "operation cancelled"),
            StoreError::Journal(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub(crate) fn ensure_live(ctx: &CancellationToken) -> Result<(), StoreError> {
    if ctx.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    Ok(())
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Insert-if-no-overlap. Fails with `Overlap` when any existing booking
    /// intersects the new interval; check and write are one atomic step.
    async fn insert_booking(
        &self,
        ctx: &CancellationToken,
        booking: NewBooking,
    ) -> Result<Booking, StoreError>;

    /// Bookings intersecting `span`, optionally ignoring one booking id.
    async fn find_overlapping_bookings(
        &self,
        ctx: &CancellationToken,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Delete scoped to the actor's bookings unless the actor is an admin.
    async fn delete_booking(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
        actor: Actor,
    ) -> Result<(), StoreError>;

    /// Move a booking, scoped like `delete_booking`. Re-checks overlap against
    /// every booking but itself in the same atomic step.
    async fn update_booking_schedule(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
        actor: Actor,
        start: Ms,
        duration_minutes: u32,
    ) -> Result<Booking, StoreError>;

    async fn find_booking_by_id(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
    ) -> Result<Booking, StoreError>;

    async fn list_bookings_by_user(
        &self,
        ctx: &CancellationToken,
        user_id: Ulid,
    ) -> Result<Vec<Booking>, StoreError>;

    async fn list_all_bookings(&self, ctx: &CancellationToken) -> Result<Vec<Booking>, StoreError>;
}

#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    async fn insert_availability_pattern(
        &self,
        ctx: &CancellationToken,
        pattern: AvailabilityPattern,
    ) -> Result<(), StoreError>;

    /// Idempotent per `(provider_id, start)`: if that provider already has a
    /// slot starting there, nothing is written and the stored slot is
    /// returned instead.
    async fn insert_availability_slot(
        &self,
        ctx: &CancellationToken,
        slot: AvailabilitySlot,
    ) -> Result<AvailabilitySlot, StoreError>;

    async fn find_pattern_by_id(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
    ) -> Result<AvailabilityPattern, StoreError>;

    async fn update_availability_pattern(
        &self,
        ctx: &CancellationToken,
        pattern: AvailabilityPattern,
    ) -> Result<(), StoreError>;

    /// Scoped to the owning provider.
    async fn delete_availability_pattern(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
        provider_id: Ulid,
    ) -> Result<(), StoreError>;

    async fn list_patterns_by_provider(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
    ) -> Result<Vec<AvailabilityPattern>, StoreError>;

    async fn find_slot_by_id(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
    ) -> Result<AvailabilitySlot, StoreError>;

    /// Scoped to the owning provider.
    async fn delete_availability_slot(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
        provider_id: Ulid,
    ) -> Result<(), StoreError>;

    async fn list_slots_by_provider(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
    ) -> Result<Vec<AvailabilitySlot>, StoreError>;

    /// Slots of `provider_id` intersecting `span`.
    async fn list_slots_in_range(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
        span: Span,
    ) -> Result<Vec<AvailabilitySlot>, StoreError>;

    /// Like `list_slots_in_range`, minus slots that a booking overlaps or
    /// references.
    async fn list_free_slots(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
        span: Span,
    ) -> Result<Vec<AvailabilitySlot>, StoreError>;
}
