//! Public write path: raw caller input in, admitted slot or typed error out.
//!
//! This layer only checks presence, parses the start time and applies the
//! naming convention. Interval math and overlap checks live in the engine.

use std::sync::Arc;

use chrono::FixedOffset;

use crate::engine::{now_ms, Engine, EngineError};
use crate::model::{Ms, Photo, Slot};
use crate::timefmt::parse_timestamp;

/// Unvalidated schedule input, as it arrives from a client.
#[derive(Debug, Clone, Default)]
pub struct ScheduleRequest {
    pub subject_name: Option<String>,
    pub message: Option<String>,
    pub start_time: Option<String>,
    pub photo: Option<Photo>,
}

pub struct ScheduleService {
    engine: Arc<Engine>,
    local_offset: FixedOffset,
}

fn required(field: Option<String>, name: &str) -> Result<String, EngineError> {
    match field {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(EngineError::Validation(format!("{name} is required"))),
    }
}

impl ScheduleService {
    /// `local_offset` is applied to start times given without an offset.
    pub fn new(engine: Arc<Engine>, local_offset: FixedOffset) -> Self {
        Self {
            engine,
            local_offset,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn local_offset(&self) -> FixedOffset {
        self.local_offset
    }

    pub async fn schedule(&self, req: ScheduleRequest) -> Result<Slot, EngineError> {
        self.schedule_at(req, now_ms()).await
    }

    pub async fn schedule_at(&self, req: ScheduleRequest, now: Ms) -> Result<Slot, EngineError> {
        let subject_name = required(req.subject_name, "subject name")?.to_uppercase();
        let message = required(req.message, "message")?;
        let raw_start = required(req.start_time, "start time")?;
        let start =
            parse_timestamp(&raw_start, self.local_offset).map_err(EngineError::Validation)?;

        self.engine
            .propose_slot(start, subject_name, message, req.photo, now)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::MAX_PHOTO_BYTES;
    use crate::model::SLOT_DURATION_MS;
    use crate::timefmt::{parse_utc_offset, utc};
    use std::path::PathBuf;

    // 2025-01-01T10:00:00Z
    const TEN_AM: Ms = 1_735_725_600_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spotlight_test_schedule");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn service(name: &str, offset: FixedOffset) -> ScheduleService {
        let engine = Arc::new(Engine::new(test_wal_path(name)).unwrap());
        ScheduleService::new(engine, offset)
    }

    fn request(name: &str, message: &str, start: &str) -> ScheduleRequest {
        ScheduleRequest {
            subject_name: Some(name.into()),
            message: Some(message.into()),
            start_time: Some(start.into()),
            photo: None,
        }
    }

    #[tokio::test]
    async fn schedules_and_uppercases_name() {
        let svc = service("uppercase.wal", utc());
        let slot = svc
            .schedule_at(request("  alice ", " Happy birthday!\nMany more ", "2025-01-01T10:00:00Z"), 0)
            .await
            .unwrap();
        assert_eq!(slot.subject_name, "ALICE");
        assert_eq!(slot.message, "Happy birthday!\nMany more");
        assert_eq!(slot.start(), TEN_AM);
        assert_eq!(slot.end(), TEN_AM + SLOT_DURATION_MS);
    }

    #[tokio::test]
    async fn missing_fields_are_validation_errors() {
        let svc = service("missing.wal", utc());
        let cases = [
            ScheduleRequest {
                subject_name: None,
                ..request("", "msg", "2025-01-01T10:00:00Z")
            },
            request("   ", "msg", "2025-01-01T10:00:00Z"),
            request("bob", "", "2025-01-01T10:00:00Z"),
            request("bob", "msg", " "),
        ];
        for req in cases {
            let err = svc.schedule_at(req, 0).await.unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "got {err}");
        }
        assert_eq!(svc.engine().slot_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unparsable_start_is_validation_error() {
        let svc = service("bad_start.wal", utc());
        let err = svc
            .schedule_at(request("bob", "msg", "next tuesday"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn naive_start_uses_local_offset() {
        let svc = service("local_offset.wal", parse_utc_offset("+05:30").unwrap());
        let slot = svc
            .schedule_at(request("bob", "msg", "2025-01-01T15:30"), 0)
            .await
            .unwrap();
        assert_eq!(slot.start(), TEN_AM);
    }

    #[tokio::test]
    async fn oversize_photo_rejected_before_store() {
        let svc = service("big_photo.wal", utc());
        let mut req = request("bob", "msg", "2025-01-01T10:00:00Z");
        req.photo = Some(Photo::new("image/jpeg", vec![0u8; MAX_PHOTO_BYTES + 1]));
        let err = svc.schedule_at(req, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::LimitExceeded(_)));
        assert_eq!(svc.engine().slot_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn photo_at_limit_accepted() {
        let svc = service("limit_photo.wal", utc());
        let mut req = request("bob", "msg", "2025-01-01T10:00:00Z");
        req.photo = Some(Photo::new("image/jpeg", vec![0u8; MAX_PHOTO_BYTES]));
        let slot = svc.schedule_at(req, 0).await.unwrap();
        assert_eq!(slot.photo.map(|p| p.data.len()), Some(MAX_PHOTO_BYTES));
    }

    #[tokio::test]
    async fn conflict_reported_with_existing_slot() {
        let svc = service("conflict.wal", utc());
        svc.schedule_at(request("alice", "one", "2025-01-01T10:00:00Z"), 0)
            .await
            .unwrap();
        let err = svc
            .schedule_at(request("bob", "two", "2025-01-01T10:30:00Z"), 0)
            .await
            .unwrap_err();
        match err {
            EngineError::Conflict(c) => {
                assert_eq!(c.subject_name, "ALICE");
                assert_eq!(c.start, TEN_AM);
                assert_eq!(c.end, TEN_AM + SLOT_DURATION_MS);
            }
            other => panic!("expected Conflict, got {other}"),
        }
    }
}
