use std::collections::HashSet;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Every slot is exactly one hour long.
pub const SLOT_DURATION_MS: Ms = 3_600_000;

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

    /// The fixed-length span of a slot starting at `start`.
    pub fn slot_at(start: Ms) -> Self {
        Self::new(start, start + SLOT_DURATION_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Image attached to a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub content_type: String,
    pub data: Bytes,
}

impl Photo {
    pub fn new(content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// `data:<content_type>;base64,<payload>`
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            BASE64.encode(&self.data)
        )
    }

    pub fn from_data_uri(uri: &str) -> Result<Self, String> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| "photo must be a data: URI".to_string())?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| "photo data URI has no payload".to_string())?;
        let content_type = meta
            .strip_suffix(";base64")
            .ok_or_else(|| "photo data URI must be base64-encoded".to_string())?;
        let data = BASE64
            .decode(payload.trim())
            .map_err(|e| format!("bad base64 in photo: {e}"))?;
        Ok(Self::new(content_type, data))
    }
}

/// A scheduled celebration record. The end of the span is always derived
/// from the start, so the span is only settable through [`Slot::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SlotRecord", into = "SlotRecord")]
pub struct Slot {
    pub id: Ulid,
    pub subject_name: String,
    pub message: String,
    pub photo: Option<Photo>,
    span: Span,
}

/// Persisted form of a [`Slot`]. Only the start is stored; the end is
/// derived again whenever a slot is read back.
#[derive(Serialize, Deserialize)]
struct SlotRecord {
    id: Ulid,
    subject_name: String,
    message: String,
    photo: Option<Photo>,
    start: Ms,
}

impl From<SlotRecord> for Slot {
    fn from(r: SlotRecord) -> Self {
        Slot::new(r.id, r.start, r.subject_name, r.message, r.photo)
    }
}

impl From<Slot> for SlotRecord {
    fn from(slot: Slot) -> Self {
        Self {
            start: slot.start(),
            id: slot.id,
            subject_name: slot.subject_name,
            message: slot.message,
            photo: slot.photo,
        }
    }
}

impl Slot {
    pub fn new(
        id: Ulid,
        start: Ms,
        subject_name: String,
        message: String,
        photo: Option<Photo>,
    ) -> Self {
        Self {
            id,
            subject_name,
            message,
            photo,
            span: Span::slot_at(start),
        }
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn start(&self) -> Ms {
        self.span.start
    }

    pub fn end(&self) -> Ms {
        self.span.end
    }
}

/// Identifying fields of the slot a candidate collided with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictingSlot {
    pub start: Ms,
    pub end: Ms,
    pub subject_name: String,
}

impl From<&Slot> for ConflictingSlot {
    fn from(slot: &Slot) -> Self {
        Self {
            start: slot.start(),
            end: slot.end(),
            subject_name: slot.subject_name.clone(),
        }
    }
}

/// All stored slots, sorted by start.
#[derive(Debug, Clone, Default)]
pub struct SlotTable {
    pub slots: Vec<Slot>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Insert slot maintaining sort order by start.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .slots
            .partition_point(|s| s.start() <= slot.start());
        self.slots.insert(pos, slot);
    }

    /// Remove every slot whose id is in `ids`. Returns how many were removed;
    /// unknown ids are ignored.
    pub fn remove_slots(&mut self, ids: &[Ulid]) -> usize {
        let ids: HashSet<Ulid> = ids.iter().copied().collect();
        let before = self.slots.len();
        self.slots.retain(|s| !ids.contains(&s.id));
        before - self.slots.len()
    }

    /// Return only slots whose span overlaps the query window.
    /// Uses binary search to skip slots starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Slot> {
        let right_bound = self.slots.partition_point(|s| s.start() < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.end() > query.start)
    }

    /// Ids of slots whose span has fully elapsed at `now`.
    pub fn ended_by(&self, now: Ms) -> Vec<Ulid> {
        // Fixed duration: ends are sorted the same way starts are.
        let bound = self.slots.partition_point(|s| s.end() <= now);
        self.slots[..bound].iter().map(|s| s.id).collect()
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotScheduled { slot: Slot },
    /// One reaper pass, logged as a single record.
    SlotsReaped { ids: Vec<Ulid> },
}
