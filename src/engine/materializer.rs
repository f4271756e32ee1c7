use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset, Weekday};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::MAX_HORIZON_DAYS;
use crate::model::*;
use crate::observability::{record_op, SLOTS_MATERIALIZED_TOTAL};
use crate::store::{AvailabilityStore, StoreError};

use super::conflict::validate_span;
use super::expand::{expand_weekly, time_of_day};
use super::EngineError;

fn pattern_err(err: StoreError) -> EngineError {
    EngineError::from_store(err, EngineError::PatternNotFound)
}

fn slot_err(err: StoreError) -> EngineError {
    EngineError::from_store(err, EngineError::SlotNotFound)
}

/// Result of a successful pattern expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub pattern: AvailabilityPattern,
    pub slots_created: usize,
}

/// A checked weekly window, ready to store or expand.
struct Window {
    weekday: Weekday,
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

/// Pattern lifecycle and expansion of patterns into dated one-hour slots.
pub struct Materializer<S: ?Sized> {
    store: Arc<S>,
    horizon_days: i64,
}

impl<S: ?Sized> Clone for Materializer<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            horizon_days: self.horizon_days,
        }
    }
}

impl<S: AvailabilityStore + ?Sized> Materializer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            horizon_days: MAX_HORIZON_DAYS,
        }
    }

    /// Shorten the longest date range one pattern may be expanded over.
    /// Clamped to `1..=MAX_HORIZON_DAYS`.
    pub fn with_horizon_days(mut self, days: i64) -> Self {
        self.horizon_days = days.clamp(1, MAX_HORIZON_DAYS);
        self
    }

    fn check_window(
        &self,
        day_of_week: u8,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Window, EngineError> {
        let weekday = weekday_from_sunday(day_of_week)
            .ok_or(EngineError::Invalid("day_of_week must be between 0 and 6"))?;
        if end <= start {
            return Err(EngineError::Invalid("end must be after start"));
        }
        validate_span(&Span::new(start.timestamp_millis(), end.timestamp_millis()))?;

        let end = end.with_timezone(start.offset());
        match (time_of_day(&start), time_of_day(&end)) {
            (Some(open), Some(close)) if close > open => {}
            _ => return Err(EngineError::Invalid("daily window must end after it opens")),
        }
        let days = (end.date_naive() - start.date_naive()).num_days();
        if days > self.horizon_days {
            return Err(EngineError::LimitExceeded("expansion horizon too long"));
        }
        Ok(Window { weekday, start, end })
    }

    /// Store a weekly pattern and expand it into one-hour slots over
    /// `start`'s date through `end`'s date.
    ///
    /// Slots are written one at a time. The first failing write stops the
    /// expansion and is returned; the pattern and any slots already written
    /// stay. Slot writes are idempotent per start, so calling again with the
    /// same arguments fills the gaps without duplicating slots (it does store
    /// a second pattern). `slots_created` counts only slots this call wrote.
    pub async fn create_pattern_and_slots(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
        day_of_week: u8,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Materialized, EngineError> {
        let started = Instant::now();
        let result = self
            .materialize(ctx, provider_id, day_of_week, start, end)
            .await;
        record_op("create_pattern_and_slots", result.is_ok(), started);
        result
    }

    async fn materialize(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
        day_of_week: u8,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Materialized, EngineError> {
        let window = self.check_window(day_of_week, start, end)?;

        let now = now_ms();
        let pattern = AvailabilityPattern {
            id: Ulid::new(),
            provider_id,
            day_of_week,
            start: window.start.timestamp_millis(),
            end: window.end.timestamp_millis(),
            utc_offset_secs: window.start.offset().local_minus_utc(),
            created_at: now,
            updated_at: now,
        };
        self.store
            .insert_availability_pattern(ctx, pattern.clone())
            .await
            .map_err(pattern_err)?;

        let spans = expand_weekly(window.weekday, &window.start, &window.end);
        let mut created = 0;
        for (written, span) in spans.iter().enumerate() {
            let slot = AvailabilitySlot {
                id: Ulid::new(),
                provider_id,
                pattern_id: Some(pattern.id),
                start: span.start,
                end: span.end,
                created_at: now,
            };
            let slot_id = slot.id;
            let stored = match self.store.insert_availability_slot(ctx, slot).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(
                        "expansion of pattern {} stopped after {written} of {} slots: {e}",
                        pattern.id,
                        spans.len()
                    );
                    return Err(slot_err(e));
                }
            };
            // An existing slot at this start comes back under its own id.
            if stored.id == slot_id {
                created += 1;
                metrics::counter!(SLOTS_MATERIALIZED_TOTAL).increment(1);
            }
        }

        info!(
            "pattern {} for provider {provider_id}: {created} new of {} slots on {:?}",
            pattern.id,
            spans.len(),
            window.weekday
        );
        Ok(Materialized {
            pattern,
            slots_created: created,
        })
    }

    /// Replace a pattern's rule. Only the owning provider may do this.
    /// Slots already generated are left as they are.
    pub async fn update_pattern(
        &self,
        ctx: &CancellationToken,
        pattern_id: Ulid,
        provider_id: Ulid,
        day_of_week: u8,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<AvailabilityPattern, EngineError> {
        let started = Instant::now();
        let result: Result<AvailabilityPattern, EngineError> = async {
            let window = self.check_window(day_of_week, start, end)?;
            let existing = self
                .store
                .find_pattern_by_id(ctx, pattern_id)
                .await
                .map_err(pattern_err)?;
            if existing.provider_id != provider_id {
                return Err(EngineError::NotAuthorized);
            }
            let updated = AvailabilityPattern {
                day_of_week,
                start: window.start.timestamp_millis(),
                end: window.end.timestamp_millis(),
                utc_offset_secs: window.start.offset().local_minus_utc(),
                updated_at: now_ms(),
                ..existing
            };
            self.store
                .update_availability_pattern(ctx, updated.clone())
                .await
                .map_err(pattern_err)?;
            info!("pattern {pattern_id} updated");
            Ok(updated)
        }
        .await;
        record_op("update_pattern", result.is_ok(), started);
        result
    }

    /// Delete a pattern owned by `provider_id`. Its slots stay.
    pub async fn delete_pattern(
        &self,
        ctx: &CancellationToken,
        pattern_id: Ulid,
        provider_id: Ulid,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self
            .store
            .delete_availability_pattern(ctx, pattern_id, provider_id)
            .await
            .map_err(pattern_err);
        record_op("delete_pattern", result.is_ok(), started);
        result
    }

    pub async fn get_pattern(
        &self,
        ctx: &CancellationToken,
        pattern_id: Ulid,
    ) -> Result<AvailabilityPattern, EngineError> {
        self.store
            .find_pattern_by_id(ctx, pattern_id)
            .await
            .map_err(pattern_err)
    }

    pub async fn list_patterns(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
    ) -> Result<Vec<AvailabilityPattern>, EngineError> {
        self.store
            .list_patterns_by_provider(ctx, provider_id)
            .await
            .map_err(pattern_err)
    }

    /// Add one ad-hoc slot outside any pattern. If the provider already has a
    /// slot starting at `start`, that slot is returned instead.
    pub async fn create_slot(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<AvailabilitySlot, EngineError> {
        let started = Instant::now();
        let result: Result<AvailabilitySlot, EngineError> = async {
            let span = checked_range(start, end)?;
            let slot = AvailabilitySlot {
                id: Ulid::new(),
                provider_id,
                pattern_id: None,
                start: span.start,
                end: span.end,
                created_at: now_ms(),
            };
            self.store
                .insert_availability_slot(ctx, slot)
                .await
                .map_err(slot_err)
        }
        .await;
        record_op("create_slot", result.is_ok(), started);
        result
    }

    pub async fn get_slot(
        &self,
        ctx: &CancellationToken,
        slot_id: Ulid,
    ) -> Result<AvailabilitySlot, EngineError> {
        self.store.find_slot_by_id(ctx, slot_id).await.map_err(slot_err)
    }

    pub async fn delete_slot(
        &self,
        ctx: &CancellationToken,
        slot_id: Ulid,
        provider_id: Ulid,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self
            .store
            .delete_availability_slot(ctx, slot_id, provider_id)
            .await
            .map_err(slot_err);
        record_op("delete_slot", result.is_ok(), started);
        result
    }

    pub async fn list_slots(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
    ) -> Result<Vec<AvailabilitySlot>, EngineError> {
        self.store
            .list_slots_by_provider(ctx, provider_id)
            .await
            .map_err(slot_err)
    }

    /// Slots of `provider_id` that intersect `[start, end)`.
    pub async fn list_slots_in_range(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<AvailabilitySlot>, EngineError> {
        let span = checked_range(start, end)?;
        self.store
            .list_slots_in_range(ctx, provider_id, span)
            .await
            .map_err(slot_err)
    }

    /// Slots in `[start, end)` that no booking overlaps or references.
    pub async fn list_free_slots(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<AvailabilitySlot>, EngineError> {
        let span = checked_range(start, end)?;
        self.store
            .list_free_slots(ctx, provider_id, span)
            .await
            .map_err(slot_err)
    }
}

fn checked_range(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if end <= start {
        return Err(EngineError::Invalid("end must be after start"));
    }
    let span = Span::new(start, end);
    validate_span(&span)?;
    Ok(span)
}
