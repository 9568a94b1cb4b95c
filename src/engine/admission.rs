use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::SLOTS_PROPOSED_TOTAL;

use super::conflict::find_conflict;
use super::{Engine, EngineError};

fn check_candidate(
    start: Ms,
    subject_name: &str,
    message: &str,
    photo: Option<&Photo>,
) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&start) {
        return Err(EngineError::Validation("start time out of range".into()));
    }
    if subject_name.trim().is_empty() {
        return Err(EngineError::Validation("subject name is required".into()));
    }
    if message.trim().is_empty() {
        return Err(EngineError::Validation("message is required".into()));
    }
    if subject_name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("subject name too long"));
    }
    if message.len() > MAX_MESSAGE_LEN {
        return Err(EngineError::LimitExceeded("message too long"));
    }
    if let Some(photo) = photo {
        if photo.content_type.trim().is_empty() {
            return Err(EngineError::Validation("photo content type is required".into()));
        }
        if photo
            .content_type
            .chars()
            .any(|c| c == ',' || c == ';' || c.is_whitespace() || c.is_control())
        {
            return Err(EngineError::Validation(
                "photo content type must be a bare MIME type".into(),
            ));
        }
        if photo.content_type.len() > MAX_CONTENT_TYPE_LEN {
            return Err(EngineError::LimitExceeded("photo content type too long"));
        }
        if photo.data.len() > MAX_PHOTO_BYTES {
            return Err(EngineError::LimitExceeded("photo larger than 5 MiB"));
        }
    }
    Ok(())
}

impl Engine {
    /// Admit a one-hour slot starting at `start`, or report the slot it
    /// collides with. The conflict check and the insert happen under one
    /// write guard, so concurrent proposals are serialized.
    pub async fn propose_slot(
        &self,
        start: Ms,
        subject_name: String,
        message: String,
        photo: Option<Photo>,
        now: Ms,
    ) -> Result<Slot, EngineError> {
        let result = self
            .admit(start, subject_name, message, photo, now)
            .await;
        let outcome = match &result {
            Ok(_) => "admitted",
            Err(EngineError::Conflict(_)) => "conflict",
            Err(EngineError::Storage(_)) => "error",
            Err(_) => "rejected",
        };
        metrics::counter!(SLOTS_PROPOSED_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn admit(
        &self,
        start: Ms,
        subject_name: String,
        message: String,
        photo: Option<Photo>,
        now: Ms,
    ) -> Result<Slot, EngineError> {
        check_candidate(start, &subject_name, &message, photo.as_ref())?;
        let candidate = Span::slot_at(start);

        let mut table = self.store.write().await?;
        if let Some(existing) = find_conflict(&table, &candidate, now) {
            tracing::debug!(
                "rejecting [{}, {}): overlaps slot {}",
                candidate.start,
                candidate.end,
                existing.id
            );
            return Err(EngineError::Conflict(existing.into()));
        }
        if table.len() >= MAX_SLOTS {
            return Err(EngineError::LimitExceeded("too many stored slots"));
        }

        let slot = Slot::new(Ulid::new(), start, subject_name, message, photo);
        self.store.create(&mut table, slot.clone()).await?;
        tracing::info!(
            "admitted slot {} for {} at [{}, {})",
            slot.id,
            slot.subject_name,
            slot.start(),
            slot.end()
        );
        Ok(slot)
    }
}
