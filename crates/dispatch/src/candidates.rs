//! Candidate source trait and the in-memory drover roster.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::DroverId;
use domain::Transfer;

use crate::error::{DispatchError, Result};

/// Supplies the drovers a transfer should be offered to.
///
/// Geographic or skill filtering belongs to the implementation; the
/// coordinator only deduplicates against offers that are still pending.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(&self, transfer: &Transfer) -> Result<Vec<DroverId>>;
}

#[derive(Debug, Default)]
struct RosterState {
    available: BTreeSet<DroverId>,
    fail_on_lookup: bool,
}

/// Drovers who marked themselves available, regardless of location.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDroverRoster {
    state: Arc<RwLock<RosterState>>,
}

impl InMemoryDroverRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_available(drovers: impl IntoIterator<Item = DroverId>) -> Self {
        let roster = Self::new();
        for drover in drovers {
            roster.set_available(drover, true);
        }
        roster
    }

    /// Returns whether the drover's availability changed.
    pub fn set_available(&self, drover_id: DroverId, available: bool) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if available {
            state.available.insert(drover_id)
        } else {
            state.available.remove(&drover_id)
        }
    }

    pub fn is_available(&self, drover_id: DroverId) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .available
            .contains(&drover_id)
    }

    pub fn available(&self) -> Vec<DroverId> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .available
            .iter()
            .copied()
            .collect()
    }

    /// Makes the next lookups fail until switched back.
    pub fn set_fail_on_lookup(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_lookup = fail;
    }
}

#[async_trait]
impl CandidateSource for InMemoryDroverRoster {
    async fn candidates(&self, _transfer: &Transfer) -> Result<Vec<DroverId>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on_lookup {
            return Err(DispatchError::Candidates(
                "drover roster unavailable".to_string(),
            ));
        }
        Ok(state.available.iter().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_only_available_drovers() {
        let a = DroverId::new();
        let b = DroverId::new();
        let roster = InMemoryDroverRoster::with_available([a, b]);

        assert!(roster.set_available(b, false));
        assert!(!roster.set_available(b, false));

        let candidates = roster.candidates(&Transfer::default()).await.unwrap();
        assert_eq!(candidates, vec![a]);
        assert!(roster.is_available(a));
        assert!(!roster.is_available(b));
    }

    #[tokio::test]
    async fn failing_lookup_reports_candidates_error() {
        let roster = InMemoryDroverRoster::new();
        roster.set_fail_on_lookup(true);

        let result = roster.candidates(&Transfer::default()).await;
        assert!(matches!(result, Err(DispatchError::Candidates(_))));
    }
}
