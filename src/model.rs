use chrono::{DateTime, FixedOffset, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the storage time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

pub fn minutes_to_ms(minutes: u32) -> Ms {
    Ms::from(minutes) * MINUTE_MS
}

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// `[s1,e1)` and `[s2,e2)` overlap iff `s1 < e2 && s2 < e1`.
    /// Touching at a boundary is not an overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Identity and role of whoever is calling into the engine. Resolved by the
/// caller (token verification is not our concern).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Ulid,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: Ulid) -> Self {
        Self { user_id, is_admin: false }
    }

    pub fn admin(user_id: Ulid) -> Self {
        Self { user_id, is_admin: true }
    }

    /// Owner, or an admin acting on someone else's record.
    pub fn may_mutate(&self, owner: Ulid) -> bool {
        self.is_admin || self.user_id == owner
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub start: Ms,
    pub duration_minutes: u32,
    /// The availability slot this booking consumes, when booked through one.
    pub slot_id: Option<Ulid>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn end(&self) -> Ms {
        self.start + minutes_to_ms(self.duration_minutes)
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end())
    }
}

/// Arguments for a booking insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub start: Ms,
    pub duration_minutes: u32,
    pub slot_id: Option<Ulid>,
}

impl NewBooking {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.start + minutes_to_ms(self.duration_minutes))
    }
}

/// Weekly recurrence rule: one weekday, one time-of-day window.
///
/// `start`/`end` keep the full instants the rule was created with; only their
/// time-of-day (in `utc_offset_secs`) matters once the rule is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityPattern {
    pub id: Ulid,
    pub provider_id: Ulid,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u8,
    pub start: Ms,
    pub end: Ms,
    pub utc_offset_secs: i32,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl AvailabilityPattern {
    pub fn weekday(&self) -> Option<Weekday> {
        weekday_from_sunday(self.day_of_week)
    }

    pub fn local_start(&self) -> Option<DateTime<FixedOffset>> {
        local_instant(self.start, self.utc_offset_secs)
    }

    pub fn local_end(&self) -> Option<DateTime<FixedOffset>> {
        local_instant(self.end, self.utc_offset_secs)
    }
}

/// A dated, one-hour reservable window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Ulid,
    pub provider_id: Ulid,
    /// Pattern that generated this slot; `None` for slots created by hand.
    pub pattern_id: Option<Ulid>,
    pub start: Ms,
    pub end: Ms,
    pub created_at: Ms,
}

impl AvailabilitySlot {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// Sunday-based weekday numbering, matching `day_of_week`.
pub fn weekday_from_sunday(day: u8) -> Option<Weekday> {
    match day {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

fn local_instant(ms: Ms, offset_secs: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(offset_secs)?;
    DateTime::from_timestamp_millis(ms).map(|dt| dt.with_timezone(&offset))
}

/// Every booking in the single booking space, sorted by `start`.
#[derive(Debug, Clone, Default)]
pub struct BookingLedger {
    pub bookings: Vec<Booking>,
}

impl BookingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert maintaining sort order by start.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start, |b| b.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings whose interval overlaps the query window.
    /// Everything at index >= right_bound starts at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end() > query.start)
    }

    /// First booking other than `exclude` that overlaps `span`.
    pub fn first_conflict(&self, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
        self.overlapping(span)
            .find(|b| Some(b.id) != exclude)
            .map(|b| b.id)
    }
}

/// One provider's slots, sorted by `start`.
#[derive(Debug, Clone)]
pub struct SlotTable {
    pub provider_id: Ulid,
    pub slots: Vec<AvailabilitySlot>,
}

impl SlotTable {
    pub fn new(provider_id: Ulid) -> Self {
        Self {
            provider_id,
            slots: Vec::new(),
        }
    }

    pub fn insert(&mut self, slot: AvailabilitySlot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.start, |s| s.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<AvailabilitySlot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    /// The slot that starts at `start`, if any. A provider has at most one.
    pub fn starting_at(&self, start: Ms) -> Option<&AvailabilitySlot> {
        let pos = self.slots.partition_point(|s| s.start < start);
        self.slots.get(pos).filter(|s| s.start == start)
    }

    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &AvailabilitySlot> {
        let right_bound = self.slots.partition_point(|s| s.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.end > query.start)
    }
}

/// Journal record. Replaying these in order rebuilds the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    BookingRescheduled {
        id: Ulid,
        start: Ms,
        duration_minutes: u32,
        updated_at: Ms,
    },
    BookingDeleted {
        id: Ulid,
    },
    PatternCreated {
        pattern: AvailabilityPattern,
    },
    PatternUpdated {
        pattern: AvailabilityPattern,
    },
    PatternDeleted {
        id: Ulid,
    },
    SlotCreated {
        slot: AvailabilitySlot,
    },
    SlotDeleted {
        id: Ulid,
        provider_id: Ulid,
    },
}
