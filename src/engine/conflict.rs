use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// The interval a booking of `duration_minutes` starting at `start` occupies.
pub(crate) fn booking_span(start: Ms, duration_minutes: u32) -> Result<Span, EngineError> {
    if duration_minutes == 0 {
        return Err(EngineError::Invalid("duration must be greater than zero"));
    }
    if duration_minutes > MAX_BOOKING_MINUTES {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || start > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, start + minutes_to_ms(duration_minutes));
    validate_span(&span)?;
    Ok(span)
}

/// First candidate other than `exclude` whose interval overlaps `span`.
pub fn first_overlap<'a>(
    span: &Span,
    candidates: &'a [Booking],
    exclude: Option<ulid::Ulid>,
) -> Option<&'a Booking> {
    candidates
        .iter()
        .filter(|b| Some(b.id) != exclude)
        .find(|b| b.span().overlaps(span))
}
