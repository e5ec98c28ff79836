//! Per-participant in-flight guard
//!
//! Accrual for one participant must never run twice concurrently: two
//! overlapping scheduler ticks would both read the same `last_updated_at`
//! and credit the same window twice. The guard is a single-process
//! approximation of per-participant exclusivity; a multi-process deployment
//! replaces it with a row-level lock or a compare-and-swap on the deposit's
//! `last_updated_at_ms` column inside the accrual transaction.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::ParticipantId;

/// Tracks which participants currently have an accrual in flight
#[derive(Default)]
pub struct InFlightGuard {
    active: DashMap<ParticipantId, ()>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self { active: DashMap::new() }
    }

    /// Claim the participant, or return None while another claim is held
    pub fn try_begin(&self, id: ParticipantId) -> Option<GuardToken<'_>> {
        match self.active.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(GuardToken { guard: self, id })
            }
        }
    }

    fn release(&self, id: ParticipantId) {
        self.active.remove(&id);
    }
}

/// RAII claim on a participant; released on drop
pub struct GuardToken<'a> {
    guard: &'a InFlightGuard,
    id: ParticipantId,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_rejected_until_release() {
        let guard = InFlightGuard::new();

        let token = guard.try_begin(7).expect("first claim succeeds");
        assert!(guard.try_begin(7).is_none());

        // Other participants are unaffected
        assert!(guard.try_begin(8).is_some());

        drop(token);
        assert!(guard.try_begin(7).is_some());
    }
}
