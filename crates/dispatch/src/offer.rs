//! Offers and the per-transfer offer ledger.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{DroverId, TransferId};
use serde::Serialize;

pub const DEFAULT_OFFER_TTL: Duration = Duration::from_secs(90);
pub const MIN_OFFER_TTL: Duration = Duration::from_secs(60);
pub const MAX_OFFER_TTL: Duration = Duration::from_secs(120);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferOutcome {
    Pending,
    Accepted,
    Declined,
    Expired,
    /// Another drover won, an admin assigned someone, or the transfer was
    /// cancelled.
    Superseded,
}

impl OfferOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferOutcome::Pending => "pending",
            OfferOutcome::Accepted => "accepted",
            OfferOutcome::Declined => "declined",
            OfferOutcome::Expired => "expired",
            OfferOutcome::Superseded => "superseded",
        }
    }
}

/// An invitation for one drover to take one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Offer {
    pub transfer_id: TransferId,
    pub drover_id: DroverId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub outcome: OfferOutcome,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Offer {
    pub fn new(
        transfer_id: TransferId,
        drover_id: DroverId,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            transfer_id,
            drover_id,
            created_at: now,
            expires_at: now + ttl,
            outcome: OfferOutcome::Pending,
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outcome == OfferOutcome::Pending
    }

    /// Pending but past its expiry.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && now >= self.expires_at
    }

    fn resolve(&mut self, outcome: OfferOutcome, at: DateTime<Utc>) {
        self.outcome = outcome;
        self.resolved_at = Some(at);
    }
}

/// Timing knobs for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferPolicy {
    ttl: Duration,
    sweep_interval: Duration,
    retention: Duration,
}

impl OfferPolicy {
    /// Builds a policy with `ttl` clamped to the 60–120 s window.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl.clamp(MIN_OFFER_TTL, MAX_OFFER_TTL),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    /// How long a fully resolved ledger entry is kept for inspection.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub(crate) fn ttl_delta(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl.as_secs() as i64)
    }

    pub(crate) fn retention_delta(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention.as_secs() as i64)
    }
}

impl Default for OfferPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_OFFER_TTL)
    }
}

/// Every offer made for every transfer the coordinator is tracking.
///
/// Owned by the coordinator task; nothing here is shared or locked.
#[derive(Debug, Default)]
pub struct OfferLedger {
    offers: HashMap<TransferId, Vec<Offer>>,
}

impl OfferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a pending offer unless the drover already holds one.
    pub fn open(
        &mut self,
        transfer_id: TransferId,
        drover_id: DroverId,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Option<Offer> {
        let offers = self.offers.entry(transfer_id).or_default();
        if offers
            .iter()
            .any(|o| o.drover_id == drover_id && o.is_pending())
        {
            return None;
        }
        let offer = Offer::new(transfer_id, drover_id, now, ttl);
        offers.push(offer.clone());
        Some(offer)
    }

    pub fn offers(&self, transfer_id: TransferId) -> Vec<Offer> {
        self.offers.get(&transfer_id).cloned().unwrap_or_default()
    }

    /// The most recent offer made to a drover for a transfer.
    pub fn latest(&self, transfer_id: TransferId, drover_id: DroverId) -> Option<&Offer> {
        self.offers
            .get(&transfer_id)?
            .iter()
            .rev()
            .find(|o| o.drover_id == drover_id)
    }

    pub fn pending_count(&self, transfer_id: TransferId) -> usize {
        self.count(transfer_id, OfferOutcome::Pending)
    }

    pub fn accepted_count(&self, transfer_id: TransferId) -> usize {
        self.count(transfer_id, OfferOutcome::Accepted)
    }

    fn count(&self, transfer_id: TransferId, outcome: OfferOutcome) -> usize {
        self.offers
            .get(&transfer_id)
            .map_or(0, |offers| offers.iter().filter(|o| o.outcome == outcome).count())
    }

    /// True once offers were sent and every one ran out without a taker.
    pub fn is_exhausted(&self, transfer_id: TransferId) -> bool {
        self.offers.get(&transfer_id).is_some_and(|offers| {
            !offers.is_empty()
                && offers.iter().all(|o| {
                    matches!(o.outcome, OfferOutcome::Declined | OfferOutcome::Expired)
                })
        })
    }

    /// Resolves the drover's pending offer. Returns `false` if there was none.
    pub fn resolve(
        &mut self,
        transfer_id: TransferId,
        drover_id: DroverId,
        outcome: OfferOutcome,
        at: DateTime<Utc>,
    ) -> bool {
        let Some(offer) = self.offers.get_mut(&transfer_id).and_then(|offers| {
            offers
                .iter_mut()
                .find(|o| o.drover_id == drover_id && o.is_pending())
        }) else {
            return false;
        };
        offer.resolve(outcome, at);
        true
    }

    /// Marks every pending offer of a transfer superseded and returns the
    /// drovers that held them.
    pub fn supersede_pending(&mut self, transfer_id: TransferId, at: DateTime<Utc>) -> Vec<DroverId> {
        let Some(offers) = self.offers.get_mut(&transfer_id) else {
            return Vec::new();
        };
        offers
            .iter_mut()
            .filter(|o| o.is_pending())
            .map(|o| {
                o.resolve(OfferOutcome::Superseded, at);
                o.drover_id
            })
            .collect()
    }

    /// Expires every overdue pending offer and returns them.
    pub fn expire_overdue(&mut self, now: DateTime<Utc>) -> Vec<Offer> {
        let mut expired = Vec::new();
        for offer in self.offers.values_mut().flatten() {
            if offer.is_overdue(now) {
                offer.resolve(OfferOutcome::Expired, now);
                expired.push(offer.clone());
            }
        }
        expired
    }

    /// Forgets transfers with no pending offer whose last resolution is
    /// older than `retention`. Returns how many were dropped.
    pub fn prune(&mut self, now: DateTime<Utc>, retention: chrono::Duration) -> usize {
        let before = self.offers.len();
        self.offers.retain(|_, offers| {
            offers.iter().any(Offer::is_pending)
                || offers
                    .iter()
                    .filter_map(|o| o.resolved_at)
                    .max()
                    .is_some_and(|last| now - last < retention)
        });
        before - self.offers.len()
    }

    pub fn tracked_transfers(&self) -> usize {
        self.offers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ttl() -> chrono::Duration {
        chrono::Duration::seconds(90)
    }

    #[test]
    fn policy_clamps_ttl_to_window() {
        assert_eq!(OfferPolicy::new(Duration::from_secs(10)).ttl(), MIN_OFFER_TTL);
        assert_eq!(OfferPolicy::new(Duration::from_secs(600)).ttl(), MAX_OFFER_TTL);
        assert_eq!(OfferPolicy::default().ttl(), Duration::from_secs(90));
        assert_eq!(
            OfferPolicy::default()
                .with_sweep_interval(Duration::ZERO)
                .sweep_interval(),
            MIN_SWEEP_INTERVAL
        );
    }

    #[test]
    fn one_pending_offer_per_drover() {
        let mut ledger = OfferLedger::new();
        let transfer = TransferId::new();
        let drover = DroverId::new();
        let now = Utc::now();

        assert!(ledger.open(transfer, drover, now, ttl()).is_some());
        assert!(ledger.open(transfer, drover, now, ttl()).is_none());
        assert_eq!(ledger.pending_count(transfer), 1);

        assert!(ledger.resolve(transfer, drover, OfferOutcome::Declined, now));
        assert!(ledger.open(transfer, drover, now, ttl()).is_some());
        assert_eq!(ledger.offers(transfer).len(), 2);
    }

    #[test]
    fn overdue_offers_expire_at_their_deadline() {
        let mut ledger = OfferLedger::new();
        let transfer = TransferId::new();
        let now = Utc::now();
        let offer = ledger
            .open(transfer, DroverId::new(), now, chrono::Duration::seconds(60))
            .unwrap();

        assert!(ledger.expire_overdue(now + chrono::Duration::seconds(59)).is_empty());
        let expired = ledger.expire_overdue(offer.expires_at);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].outcome, OfferOutcome::Expired);
        assert!(ledger.is_exhausted(transfer));
    }

    #[test]
    fn superseding_leaves_resolved_offers_alone() {
        let mut ledger = OfferLedger::new();
        let transfer = TransferId::new();
        let (a, b, c) = (DroverId::new(), DroverId::new(), DroverId::new());
        let now = Utc::now();
        for drover in [a, b, c] {
            ledger.open(transfer, drover, now, ttl());
        }

        ledger.resolve(transfer, a, OfferOutcome::Declined, now);
        ledger.resolve(transfer, b, OfferOutcome::Accepted, now);
        let superseded = ledger.supersede_pending(transfer, now);

        assert_eq!(superseded, vec![c]);
        assert_eq!(ledger.accepted_count(transfer), 1);
        assert_eq!(
            ledger.latest(transfer, a).map(|o| o.outcome),
            Some(OfferOutcome::Declined)
        );
        assert!(!ledger.is_exhausted(transfer));
    }

    #[test]
    fn prune_keeps_live_and_recent_entries() {
        let mut ledger = OfferLedger::new();
        let now = Utc::now();
        let live = TransferId::new();
        let old = TransferId::new();
        let drover = DroverId::new();

        ledger.open(live, drover, now, ttl());
        ledger.open(old, drover, now, ttl());
        ledger.resolve(old, drover, OfferOutcome::Declined, now);

        let later = now + chrono::Duration::hours(2);
        assert_eq!(ledger.prune(later, chrono::Duration::hours(1)), 1);
        assert_eq!(ledger.tracked_transfers(), 1);
        assert_eq!(ledger.pending_count(live), 1);
    }

    #[test]
    fn offer_serializes_outcome_in_snake_case() {
        let offer = Offer::new(TransferId::new(), DroverId::new(), Utc::now(), ttl());
        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json["outcome"], "pending");
        assert!(json["resolved_at"].is_null());
    }
}
