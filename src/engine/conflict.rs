use crate::model::*;

use super::expiry::is_expired;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// First stored slot (lowest start) that intersects `candidate`.
///
/// Slots already over at `now` are skipped: they are invisible to readers
/// and only wait for the reaper, so they must not block new admissions.
pub fn find_conflict<'a>(table: &'a SlotTable, candidate: &Span, now: Ms) -> Option<&'a Slot> {
    table
        .overlapping(candidate)
        .find(|slot| !is_expired(slot, now))
}
