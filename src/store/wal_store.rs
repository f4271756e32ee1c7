use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::writer::{journal_writer_loop, JournalCommand};
use super::{ensure_live, AvailabilityStore, BookingStore, StoreError};

type SharedSlotTable = Arc<RwLock<SlotTable>>;

/// In-memory store made durable by an append-only journal.
///
/// Every booking lives in one ledger behind a single write lock, so the
/// overlap check and the write it guards can't interleave with another
/// booking mutation. Slots are partitioned per provider.
pub struct WalStore {
    bookings: RwLock<BookingLedger>,
    patterns: RwLock<HashMap<Ulid, AvailabilityPattern>>,
    /// provider id → that provider's slots
    slots: DashMap<Ulid, SharedSlotTable>,
    /// slot id → provider id
    slot_owner: DashMap<Ulid, Ulid>,
    /// Mutations hold this shared; compaction holds it exclusive.
    gate: RwLock<()>,
    journal_tx: mpsc::Sender<JournalCommand>,
}

fn apply_booking(ledger: &mut BookingLedger, event: &Event) {
    match event {
        Event::BookingCreated { booking } => ledger.insert(booking.clone()),
        Event::BookingRescheduled {
            id,
            start,
            duration_minutes,
            updated_at,
        } => {
            if let Some(mut booking) = ledger.remove(*id) {
                booking.start = *start;
                booking.duration_minutes = *duration_minutes;
                booking.updated_at = *updated_at;
                // A moved booking no longer consumes the slot it was made in.
                booking.slot_id = None;
                ledger.insert(booking);
            }
        }
        Event::BookingDeleted { id } => {
            ledger.remove(*id);
        }
        _ => {}
    }
}

fn apply_pattern(patterns: &mut HashMap<Ulid, AvailabilityPattern>, event: &Event) {
    match event {
        Event::PatternCreated { pattern } | Event::PatternUpdated { pattern } => {
            patterns.insert(pattern.id, pattern.clone());
        }
        Event::PatternDeleted { id } => {
            patterns.remove(id);
        }
        _ => {}
    }
}

fn apply_slot(table: &mut SlotTable, slot_owner: &DashMap<Ulid, Ulid>, event: &Event) {
    match event {
        Event::SlotCreated { slot } => {
            slot_owner.insert(slot.id, slot.provider_id);
            table.insert(slot.clone());
        }
        Event::SlotDeleted { id, .. } => {
            table.remove(*id);
            slot_owner.remove(id);
        }
        _ => {}
    }
}

impl WalStore {
    /// Recover the journal at `path`, rebuild state from it and start its
    /// writer task. Must be called from inside a tokio runtime.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let (wal, events) = Wal::open(path)?;

        let mut ledger = BookingLedger::new();
        let mut patterns = HashMap::new();
        let mut tables: HashMap<Ulid, SlotTable> = HashMap::new();
        let slot_owner = DashMap::new();
        for event in &events {
            match event {
                Event::SlotCreated { slot } => {
                    let table = tables
                        .entry(slot.provider_id)
                        .or_insert_with(|| SlotTable::new(slot.provider_id));
                    apply_slot(table, &slot_owner, event);
                }
                Event::SlotDeleted { provider_id, .. } => {
                    if let Some(table) = tables.get_mut(provider_id) {
                        apply_slot(table, &slot_owner, event);
                    }
                }
                Event::PatternCreated { .. }
                | Event::PatternUpdated { .. }
                | Event::PatternDeleted { .. } => apply_pattern(&mut patterns, event),
                Event::BookingCreated { .. }
                | Event::BookingRescheduled { .. }
                | Event::BookingDeleted { .. } => apply_booking(&mut ledger, event),
            }
        }
        info!(
            "journal {} replayed: {} records, {} bookings, {} patterns",
            path.display(),
            events.len(),
            ledger.bookings.len(),
            patterns.len()
        );

        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(wal, journal_rx));

        Ok(Self {
            bookings: RwLock::new(ledger),
            patterns: RwLock::new(patterns),
            slots: tables
                .into_iter()
                .map(|(pid, table)| (pid, Arc::new(RwLock::new(table))))
                .collect(),
            slot_owner,
            gate: RwLock::new(()),
            journal_tx,
        })
    }

    async fn journal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))
    }

    fn slot_table(&self, provider_id: Ulid) -> Option<SharedSlotTable> {
        self.slots.get(&provider_id).map(|e| e.value().clone())
    }

    fn slot_table_or_create(&self, provider_id: Ulid) -> SharedSlotTable {
        self.slots
            .entry(provider_id)
            .or_insert_with(|| Arc::new(RwLock::new(SlotTable::new(provider_id))))
            .value()
            .clone()
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the journal as the minimal set of records that rebuilds the
    /// current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.gate.write().await;

        let mut events = Vec::new();
        for pattern in self.patterns.read().await.values() {
            events.push(Event::PatternCreated {
                pattern: pattern.clone(),
            });
        }
        let tables: Vec<SharedSlotTable> = self.slots.iter().map(|e| e.value().clone()).collect();
        for table in tables {
            for slot in &table.read().await.slots {
                events.push(Event::SlotCreated { slot: slot.clone() });
            }
        }
        for booking in &self.bookings.read().await.bookings {
            events.push(Event::BookingCreated {
                booking: booking.clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))
    }
}

#[async_trait]
impl BookingStore for WalStore {
    async fn insert_booking(
        &self,
        ctx: &CancellationToken,
        new: NewBooking,
    ) -> Result<Booking, StoreError> {
        ensure_live(ctx)?;
        let _gate = self.gate.read().await;
        let mut ledger = self.bookings.write().await;
        if let Some(existing) = ledger.first_conflict(&new.span(), None) {
            return Err(StoreError::Overlap(existing));
        }
        if ledger.get(new.id).is_some() {
            return Err(StoreError::Journal(format!("duplicate booking id {}", new.id)));
        }

        let now = now_ms();
        let booking = Booking {
            id: new.id,
            user_id: new.user_id,
            start: new.start,
            duration_minutes: new.duration_minutes,
            slot_id: new.slot_id,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.journal_append(&event).await?;
        apply_booking(&mut ledger, &event);
        Ok(booking)
    }

    async fn find_overlapping_bookings(
        &self,
        ctx: &CancellationToken,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, StoreError> {
        ensure_live(ctx)?;
        let ledger = self.bookings.read().await;
        Ok(ledger
            .overlapping(&span)
            .filter(|b| Some(b.id) != exclude)
            .cloned()
            .collect())
    }

    async fn delete_booking(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
        actor: Actor,
    ) -> Result<(), StoreError> {
        ensure_live(ctx)?;
        let _gate = self.gate.read().await;
        let mut ledger = self.bookings.write().await;
        let owner = ledger.get(id).ok_or(StoreError::NotFound(id))?.user_id;
        if !actor.may_mutate(owner) {
            return Err(StoreError::Forbidden(id));
        }
        let event = Event::BookingDeleted { id };
        self.journal_append(&event).await?;
        apply_booking(&mut ledger, &event);
        Ok(())
    }

    async fn update_booking_schedule(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
        actor: Actor,
        start: Ms,
        duration_minutes: u32,
    ) -> Result<Booking, StoreError> {
        ensure_live(ctx)?;
        let _gate = self.gate.read().await;
        let mut ledger = self.bookings.write().await;
        let owner = ledger.get(id).ok_or(StoreError::NotFound(id))?.user_id;
        if !actor.may_mutate(owner) {
            return Err(StoreError::Forbidden(id));
        }
        let span = Span::new(start, start + minutes_to_ms(duration_minutes));
        if let Some(existing) = ledger.first_conflict(&span, Some(id)) {
            return Err(StoreError::Overlap(existing));
        }

        let event = Event::BookingRescheduled {
            id,
            start,
            duration_minutes,
            updated_at: now_ms(),
        };
        self.journal_append(&event).await?;
        apply_booking(&mut ledger, &event);
        ledger.get(id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn find_booking_by_id(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
    ) -> Result<Booking, StoreError> {
        ensure_live(ctx)?;
        self.bookings
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_bookings_by_user(
        &self,
        ctx: &CancellationToken,
        user_id: Ulid,
    ) -> Result<Vec<Booking>, StoreError> {
        ensure_live(ctx)?;
        let ledger = self.bookings.read().await;
        Ok(ledger
            .bookings
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_all_bookings(&self, ctx: &CancellationToken) -> Result<Vec<Booking>, StoreError> {
        ensure_live(ctx)?;
        Ok(self.bookings.read().await.bookings.clone())
    }
}

#[async_trait]
impl AvailabilityStore for WalStore {
    async fn insert_availability_pattern(
        &self,
        ctx: &CancellationToken,
        pattern: AvailabilityPattern,
    ) -> Result<(), StoreError> {
        ensure_live(ctx)?;
        let _gate = self.gate.read().await;
        let mut patterns = self.patterns.write().await;
        if patterns.contains_key(&pattern.id) {
            return Err(StoreError::Journal(format!("duplicate pattern id {}", pattern.id)));
        }
        let event = Event::PatternCreated { pattern };
        self.journal_append(&event).await?;
        apply_pattern(&mut patterns, &event);
        Ok(())
    }

    async fn insert_availability_slot(
        &self,
        ctx: &CancellationToken,
        slot: AvailabilitySlot,
    ) -> Result<AvailabilitySlot, StoreError> {
        ensure_live(ctx)?;
        let _gate = self.gate.read().await;
        let table = self.slot_table_or_create(slot.provider_id);
        let mut guard = table.write().await;
        if let Some(existing) = guard.starting_at(slot.start) {
            return Ok(existing.clone());
        }
        if self.slot_owner.contains_key(&slot.id) {
            return Err(StoreError::Journal(format!("duplicate slot id {}", slot.id)));
        }
        let event = Event::SlotCreated { slot: slot.clone() };
        self.journal_append(&event).await?;
        apply_slot(&mut guard, &self.slot_owner, &event);
        Ok(slot)
    }

    async fn find_pattern_by_id(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
    ) -> Result<AvailabilityPattern, StoreError> {
        ensure_live(ctx)?;
        self.patterns
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_availability_pattern(
        &self,
        ctx: &CancellationToken,
        pattern: AvailabilityPattern,
    ) -> Result<(), StoreError> {
        ensure_live(ctx)?;
        let _gate = self.gate.read().await;
        let mut patterns = self.patterns.write().await;
        if !patterns.contains_key(&pattern.id) {
            return Err(StoreError::NotFound(pattern.id));
        }
        let event = Event::PatternUpdated { pattern };
        self.journal_append(&event).await?;
        apply_pattern(&mut patterns, &event);
        Ok(())
    }

    async fn delete_availability_pattern(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
        provider_id: Ulid,
    ) -> Result<(), StoreError> {
        ensure_live(ctx)?;
        let _gate = self.gate.read().await;
        let mut patterns = self.patterns.write().await;
        let owner = patterns.get(&id).ok_or(StoreError::NotFound(id))?.provider_id;
        if owner != provider_id {
            return Err(StoreError::Forbidden(id));
        }
        let event = Event::PatternDeleted { id };
        self.journal_append(&event).await?;
        apply_pattern(&mut patterns, &event);
        Ok(())
    }

    async fn list_patterns_by_provider(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
    ) -> Result<Vec<AvailabilityPattern>, StoreError> {
        ensure_live(ctx)?;
        let mut found: Vec<AvailabilityPattern> = self
            .patterns
            .read()
            .await
            .values()
            .filter(|p| p.provider_id == provider_id)
            .cloned()
            .collect();
        found.sort_by_key(|p| (p.day_of_week, p.created_at, p.id));
        Ok(found)
    }

    async fn find_slot_by_id(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
    ) -> Result<AvailabilitySlot, StoreError> {
        ensure_live(ctx)?;
        let provider_id = self
            .slot_owner
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(id))?;
        let table = self.slot_table(provider_id).ok_or(StoreError::NotFound(id))?;
        let guard = table.read().await;
        guard
            .slots
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn delete_availability_slot(
        &self,
        ctx: &CancellationToken,
        id: Ulid,
        provider_id: Ulid,
    ) -> Result<(), StoreError> {
        ensure_live(ctx)?;
        let _gate = self.gate.read().await;
        let owner = self
            .slot_owner
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(id))?;
        if owner != provider_id {
            return Err(StoreError::Forbidden(id));
        }
        let table = self.slot_table(owner).ok_or(StoreError::NotFound(id))?;
        let mut guard = table.write().await;
        // Lost a race with another delete of the same slot.
        if !guard.slots.iter().any(|s| s.id == id) {
            return Err(StoreError::NotFound(id));
        }
        let event = Event::SlotDeleted { id, provider_id };
        self.journal_append(&event).await?;
        apply_slot(&mut guard, &self.slot_owner, &event);
        Ok(())
    }

    async fn list_slots_by_provider(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
    ) -> Result<Vec<AvailabilitySlot>, StoreError> {
        ensure_live(ctx)?;
        let Some(table) = self.slot_table(provider_id) else {
            return Ok(Vec::new());
        };
        Ok(table.read().await.slots.clone())
    }

    async fn list_slots_in_range(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
        span: Span,
    ) -> Result<Vec<AvailabilitySlot>, StoreError> {
        ensure_live(ctx)?;
        let Some(table) = self.slot_table(provider_id) else {
            return Ok(Vec::new());
        };
        let guard = table.read().await;
        Ok(guard.overlapping(&span).cloned().collect())
    }

    async fn list_free_slots(
        &self,
        ctx: &CancellationToken,
        provider_id: Ulid,
        span: Span,
    ) -> Result<Vec<AvailabilitySlot>, StoreError> {
        ensure_live(ctx)?;
        let Some(table) = self.slot_table(provider_id) else {
            return Ok(Vec::new());
        };
        // Ledger before slot table, same order everywhere both are held.
        let ledger = self.bookings.read().await;
        let guard = table.read().await;
        let referenced: HashSet<Ulid> = ledger.bookings.iter().filter_map(|b| b.slot_id).collect();
        Ok(guard
            .overlapping(&span)
            .filter(|s| !referenced.contains(&s.id))
            .filter(|s| ledger.overlapping(&s.span()).next().is_none())
            .cloned()
            .collect())
    }
}
