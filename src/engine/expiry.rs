use crate::model::{Ms, Slot};

/// A slot is live while `start <= now < end`.
pub fn is_live(slot: &Slot, now: Ms) -> bool {
    slot.span().contains_instant(now)
}

/// Logically gone; eligible for reaping.
pub(super) fn is_expired(slot: &Slot, now: Ms) -> bool {
    slot.end() <= now
}
