use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{record_op, BOOKING_CONFLICTS_TOTAL};
use crate::store::{AvailabilityStore, BookingStore, StoreError};

use super::conflict::{booking_span, first_overlap};
use super::EngineError;

fn store_err(err: StoreError) -> EngineError {
    if matches!(err, StoreError::Overlap(_)) {
        metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
    }
    EngineError::from_store(err, EngineError::BookingNotFound)
}

fn observe<T>(op: &'static str, started: Instant, result: Result<T, EngineError>) -> Result<T, EngineError> {
    record_op(op, result.is_ok(), started);
    result
}

/// Booking lifecycle: conflict-checked creation, owner/admin scoped delete and
/// reschedule, owner-only lookup, and listings.
pub struct Scheduler<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: BookingStore + ?Sized> Scheduler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Reject early on a visible overlap, then let the store's conditional
    /// insert settle any race with a concurrent writer.
    async fn insert_checked(
        &self,
        ctx: &CancellationToken,
        booking: NewBooking,
    ) -> Result<Booking, EngineError> {
        let span = booking_span(booking.start, booking.duration_minutes)?;
        let overlaps = self
            .store
            .find_overlapping_bookings(ctx, span, None)
            .await
            .map_err(store_err)?;
        if let Some(existing) = first_overlap(&span, &overlaps, None) {
            debug!("booking {} rejected: overlaps {}", booking.id, existing.id);
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::BookingConflict(existing.id));
        }

        let created = self.store.insert_booking(ctx, booking).await.map_err(store_err)?;
        info!("booking {} created for user {}", created.id, created.user_id);
        Ok(created)
    }

    pub async fn create_booking(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
        user_id: Ulid,
        start: Ms,
        duration_minutes: u32,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let booking = NewBooking {
            id,
            user_id,
            start,
            duration_minutes,
            slot_id: None,
        };
        observe("create_booking", started, self.insert_checked(ctx, booking).await)
    }

    /// Non-admins may only delete their own bookings.
    pub async fn delete_booking(
        &self,
        ctx: &CancellationToken,
        booking_id: Ulid,
        actor: Actor,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self
            .store
            .delete_booking(ctx, booking_id, actor)
            .await
            .map_err(store_err);
        if result.is_ok() {
            info!("booking {booking_id} deleted by {}", actor.user_id);
        }
        observe("delete_booking", started, result)
    }

    /// Move a booking to `[new_start, new_start + duration)`. The booking's own
    /// current interval never counts as a conflict.
    pub async fn reschedule_booking(
        &self,
        ctx: &CancellationToken,
        booking_id: Ulid,
        actor: Actor,
        new_start: Ms,
        duration_minutes: u32,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self
            .reschedule(ctx, booking_id, actor, new_start, duration_minutes)
            .await;
        observe("reschedule_booking", started, result)
    }

    async fn reschedule(
        &self,
        ctx: &CancellationToken,
        booking_id: Ulid,
        actor: Actor,
        new_start: Ms,
        duration_minutes: u32,
    ) -> Result<Booking, EngineError> {
        let span = booking_span(new_start, duration_minutes)?;
        let overlaps = self
            .store
            .find_overlapping_bookings(ctx, span, Some(booking_id))
            .await
            .map_err(store_err)?;
        if let Some(existing) = first_overlap(&span, &overlaps, Some(booking_id)) {
            debug!("reschedule of {booking_id} rejected: overlaps {}", existing.id);
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::BookingConflict(existing.id));
        }

        let updated = self
            .store
            .update_booking_schedule(ctx, booking_id, actor, new_start, duration_minutes)
            .await
            .map_err(store_err)?;
        info!("booking {booking_id} moved to {new_start} ({duration_minutes} min)");
        Ok(updated)
    }

    /// Owner-only. Admins get no bypass here.
    pub async fn get_booking_by_id(
        &self,
        ctx: &CancellationToken,
        booking_id: Ulid,
        user_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let booking = self
            .store
            .find_booking_by_id(ctx, booking_id)
            .await
            .map_err(store_err)?;
        if booking.user_id != user_id {
            return Err(EngineError::NotAuthorized);
        }
        Ok(booking)
    }

    pub async fn list_user_bookings(
        &self,
        ctx: &CancellationToken,
        user_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        self.store
            .list_bookings_by_user(ctx, user_id)
            .await
            .map_err(store_err)
    }

    /// Every booking. Callers are expected to have checked the admin role.
    pub async fn list_all_bookings(&self, ctx: &CancellationToken) -> Result<Vec<Booking>, EngineError> {
        self.store.list_all_bookings(ctx).await.map_err(store_err)
    }
}

impl<S: BookingStore + AvailabilityStore + ?Sized> Scheduler<S> {
    /// Book the whole of the stored slot `slot_id`, recording it on the
    /// booking. The slot is read from the store, so its window can't be
    /// supplied by the caller.
    pub async fn book_slot(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
        user_id: Ulid,
        slot_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.book_stored_slot(ctx, id, user_id, slot_id).await;
        observe("book_slot", started, result)
    }

    async fn book_stored_slot(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
        user_id: Ulid,
        slot_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let slot = self
            .store
            .find_slot_by_id(ctx, slot_id)
            .await
            .map_err(|e| EngineError::from_store(e, EngineError::SlotNotFound))?;
        let duration_ms = slot.span().duration_ms();
        if duration_ms % MINUTE_MS != 0 {
            return Err(EngineError::Invalid("slot is not a whole number of minutes"));
        }
        let minutes = u32::try_from(duration_ms / MINUTE_MS)
            .map_err(|_| EngineError::LimitExceeded("slot too long"))?;
        let booking = NewBooking {
            id,
            user_id,
            start: slot.start,
            duration_minutes: minutes,
            slot_id: Some(slot.id),
        };
        self.insert_checked(ctx, booking).await
    }
}
