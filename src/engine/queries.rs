use crate::model::*;
use crate::observability::{ACTIVE_RESOLVES_TOTAL, INVARIANT_VIOLATIONS_TOTAL};

use super::expiry::is_live;
use super::{Engine, EngineError};

impl Engine {
    /// The slot live at `now`, if any. Expired rows the reaper has not removed
    /// yet are filtered out here, never surfaced.
    pub async fn resolve_active(&self, now: Ms) -> Result<Option<Slot>, EngineError> {
        // No slot can contain the last representable instant.
        let Some(probe_end) = now.checked_add(1) else {
            return Ok(None);
        };
        let table = self.store.read().await?;
        let probe = Span::new(now, probe_end);
        let live: Vec<&Slot> = table
            .overlapping(&probe)
            .filter(|slot| is_live(slot, now))
            .collect();

        if live.len() > 1 {
            // Admission should make this impossible. Table order means the
            // first entry has the lowest start.
            let ids: Vec<String> = live.iter().map(|s| s.id.to_string()).collect();
            tracing::error!(
                "invariant violation: {} slots live at {now}: {}",
                live.len(),
                ids.join(", ")
            );
            metrics::counter!(INVARIANT_VIOLATIONS_TOTAL).increment(1);
        }

        let active = live.first().map(|slot| (*slot).clone());
        let result = if active.is_some() { "hit" } else { "miss" };
        metrics::counter!(ACTIVE_RESOLVES_TOTAL, "result" => result).increment(1);
        Ok(active)
    }
}
