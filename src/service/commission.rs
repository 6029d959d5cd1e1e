// service/commission.rs
//! Multi-level commission distribution.
//!
//! Walking up from a referee, each edge's referrer is credited a share of the
//! base amount. The level-1 share is 10% and every level above earns a tenth
//! of the level below it, until the share drops under the policy minimum or
//! the chain reaches a root.
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{referraldb::ReferralExt, Store, StoreError},
    models::referralmodel::{ReferralEdge, ReferralStatus},
    service::error::ServiceError,
    utils::currency::{cents_as_amount, from_cents},
};

/// Rates are parts per million so the decay is exact integer division.
pub const RATE_SCALE: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommissionPolicy {
    pub level_one_rate_ppm: u32,
    pub decay_divisor: u32,
    /// Lowest rate still paid out (inclusive).
    pub min_rate_ppm: u32,
    /// Return the store error after a partial walk instead of keeping the
    /// partial credit silently. Credit already written is never rolled back.
    pub halt_on_store_error: bool,
}

impl Default for CommissionPolicy {
    fn default() -> Self {
        CommissionPolicy {
            level_one_rate_ppm: 100_000,
            decay_divisor: 10,
            min_rate_ppm: 10,
            halt_on_store_error: false,
        }
    }
}

impl CommissionPolicy {
    pub fn from_rates(
        level_one_rate: f64,
        decay_divisor: u32,
        min_rate: f64,
        halt_on_store_error: bool,
    ) -> Self {
        CommissionPolicy {
            level_one_rate_ppm: to_ppm(level_one_rate),
            // a divisor of 1 would never decay
            decay_divisor: decay_divisor.max(2),
            min_rate_ppm: to_ppm(min_rate).max(1),
            halt_on_store_error,
        }
    }

    pub fn level_one_rate(&self) -> f64 {
        self.level_one_rate_ppm as f64 / RATE_SCALE as f64
    }

    pub fn min_rate(&self) -> f64 {
        self.min_rate_ppm as f64 / RATE_SCALE as f64
    }

    /// Per-level rates in ppm, level 1 first.
    pub fn rates(&self) -> impl Iterator<Item = u32> {
        let min = self.min_rate_ppm.max(1);
        let divisor = self.decay_divisor.max(2);

        std::iter::successors(
            Some(self.level_one_rate_ppm).filter(|rate| *rate >= min),
            move |rate| Some(rate / divisor).filter(|next| *next >= min),
        )
    }

    /// `base_cents * rate`, rounded half up to whole cents.
    pub fn commission_for(&self, base_cents: i64, rate_ppm: u32) -> i64 {
        let scale = i128::from(RATE_SCALE);
        let share = (i128::from(base_cents) * i128::from(rate_ppm) + scale / 2) / scale;
        i64::try_from(share).unwrap_or(i64::MAX)
    }
}

fn to_ppm(rate: f64) -> u32 {
    if !rate.is_finite() || rate <= 0.0 {
        return 0;
    }
    (rate * RATE_SCALE as f64).round().min(RATE_SCALE as f64) as u32
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommissionCredit {
    pub referral_id: Uuid,
    pub referrer_id: Uuid,
    /// 1 for the referee's own referrer.
    pub depth: u32,
    pub rate_ppm: u32,
    #[serde(with = "cents_as_amount")]
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum StopReason {
    /// The last user visited has no referrer. Wins over `RateExhausted` when
    /// both hold.
    ReachedRoot,
    /// The next level's rate is below the policy minimum while the chain
    /// still goes on.
    RateExhausted,
    /// A referrer appeared twice on the way up.
    Cycle {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    /// A lookup or credit failed; earlier credits stand.
    StoreFailure { message: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionReport {
    pub referee_id: Uuid,
    #[serde(with = "cents_as_amount")]
    pub base_amount: i64,
    pub credits: Vec<CommissionCredit>,
    pub stop: StopReason,
}

impl DistributionReport {
    pub fn total_credited(&self) -> i64 {
        self.credits.iter().map(|c| c.amount).sum()
    }
}

#[derive(Debug, Default)]
pub struct DistributionMetrics {
    runs: AtomicU64,
    credits: AtomicU64,
    broken_chains: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionStats {
    pub runs: u64,
    pub credits: u64,
    pub broken_chains: u64,
}

impl DistributionMetrics {
    pub fn snapshot(&self) -> DistributionStats {
        DistributionStats {
            runs: self.runs.load(Ordering::Relaxed),
            credits: self.credits.load(Ordering::Relaxed),
            broken_chains: self.broken_chains.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommissionEngine {
    store: Arc<dyn Store>,
    policy: CommissionPolicy,
    metrics: Arc<DistributionMetrics>,
}

impl CommissionEngine {
    pub fn new(store: Arc<dyn Store>, policy: CommissionPolicy) -> Self {
        Self {
            store,
            policy,
            metrics: Arc::new(DistributionMetrics::default()),
        }
    }

    pub fn stats(&self) -> DistributionStats {
        self.metrics.snapshot()
    }

    /// Credits the referral chain above `referee_id` with decaying shares of
    /// `base_amount` cents. Every credited edge moves to `Pending`.
    ///
    /// Each credit is a single atomic increment in the store, so concurrent
    /// runs over the same chain never lose updates.
    pub async fn distribute(
        &self,
        referee_id: Uuid,
        base_amount: i64,
    ) -> Result<DistributionReport, ServiceError> {
        self.run(referee_id, base_amount, None).await
    }

    /// Distributes the base amount of a referral that was just completed.
    /// The referral itself stays `Completed` while the rest of the chain
    /// moves to `Pending`.
    pub async fn distribute_completion(
        &self,
        completed: &ReferralEdge,
    ) -> Result<DistributionReport, ServiceError> {
        self.run(completed.referee_id, completed.base_amount, Some(completed.id))
            .await
    }

    async fn run(
        &self,
        referee_id: Uuid,
        base_amount: i64,
        completed_referral: Option<Uuid>,
    ) -> Result<DistributionReport, ServiceError> {
        if base_amount < 0 {
            return Err(ServiceError::Validation("Amount cannot be negative".to_string()));
        }

        self.metrics.runs.fetch_add(1, Ordering::Relaxed);

        let mut report = DistributionReport {
            referee_id,
            base_amount,
            credits: Vec::new(),
            stop: StopReason::RateExhausted,
        };

        let mut current = referee_id;
        let mut visited = HashSet::from([referee_id]);
        let mut walked_every_rate = true;

        for (depth, rate_ppm) in (1u32..).zip(self.policy.rates()) {
            let referral = match self.store.get_referral_by_referee(current).await {
                Ok(Some(referral)) => referral,
                Ok(None) => {
                    report.stop = StopReason::ReachedRoot;
                    walked_every_rate = false;
                    break;
                }
                Err(err) => {
                    self.chain_broken(&mut report, current, err)?;
                    walked_every_rate = false;
                    break;
                }
            };

            let amount = self.policy.commission_for(base_amount, rate_ppm);
            let status = if completed_referral == Some(referral.id) {
                ReferralStatus::Completed
            } else {
                ReferralStatus::Pending
            };

            let credited = match self.store.credit_commission(referral.id, amount, status).await {
                Ok(credited) => credited,
                Err(err) => {
                    self.chain_broken(&mut report, current, err)?;
                    walked_every_rate = false;
                    break;
                }
            };

            self.metrics.credits.fetch_add(1, Ordering::Relaxed);
            report.credits.push(CommissionCredit {
                referral_id: credited.id,
                referrer_id: credited.referrer_id,
                depth,
                rate_ppm,
                amount,
            });

            if !visited.insert(credited.referrer_id) {
                tracing::warn!(
                    "Commission chain from {} loops back to user {}. Stopping.",
                    referee_id,
                    credited.referrer_id
                );
                report.stop = StopReason::Cycle { user_id: credited.referrer_id };
                walked_every_rate = false;
                break;
            }

            current = credited.referrer_id;
        }

        if walked_every_rate {
            report.stop = self.stop_after_last_rate(current).await;
        }

        tracing::info!(
            "Distributed {:.2} of {:.2} from referee {} across {} level(s), stop: {:?}",
            from_cents(report.total_credited()),
            from_cents(base_amount),
            referee_id,
            report.credits.len(),
            report.stop
        );

        Ok(report)
    }

    /// Rates ran out at `last_referrer`; the chain either ends there too or
    /// continues past the paid levels.
    async fn stop_after_last_rate(&self, last_referrer: Uuid) -> StopReason {
        match self.store.get_referral_by_referee(last_referrer).await {
            Ok(None) => StopReason::ReachedRoot,
            Ok(Some(_)) => StopReason::RateExhausted,
            Err(err) => {
                tracing::debug!("Could not look past user {}: {}", last_referrer, err);
                StopReason::RateExhausted
            }
        }
    }

    fn chain_broken(
        &self,
        report: &mut DistributionReport,
        at_user: Uuid,
        err: StoreError,
    ) -> Result<(), ServiceError> {
        self.metrics.broken_chains.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            "Commission chain from {} broke at user {} after {} credit(s): {}",
            report.referee_id,
            at_user,
            report.credits.len(),
            err
        );

        if self.policy.halt_on_store_error {
            return Err(ServiceError::Store(err));
        }

        report.stop = StopReason::StoreFailure { message: err.to_string() };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory::MemoryStore,
        models::referralmodel::NewReferral,
        service::graph::lineage_through,
    };

    /// Builds a straight chain u0 <- u1 <- ... <- u{len}; returns the users,
    /// root first, and the edges, root edge first.
    async fn chain(store: &MemoryStore, len: usize) -> (Vec<Uuid>, Vec<Uuid>) {
        let users: Vec<Uuid> = (0..=len).map(|_| Uuid::new_v4()).collect();
        let mut edges: Vec<Uuid> = Vec::new();
        let mut parent: Option<(i32, Vec<Uuid>, Uuid)> = None;

        for pair in users.windows(2) {
            let (level, ancestors) = match &parent {
                Some((level, ancestors, id)) => (level + 1, lineage_through(ancestors, *id)),
                None => (1, Vec::new()),
            };
            let edge = store
                .save_referral(NewReferral {
                    referrer_id: pair[0],
                    referee_id: pair[1],
                    referral_code: "CHAIN".to_string(),
                    level,
                    ancestors,
                })
                .await
                .unwrap();
            parent = Some((edge.level, edge.ancestors.clone(), edge.id));
            edges.push(edge.id);
        }

        (users, edges)
    }

    async fn earned(store: &MemoryStore, referral_id: Uuid) -> i64 {
        store.get_referral(referral_id).await.unwrap().unwrap().earned_balance
    }

    #[test]
    fn default_rates_decay_tenfold_down_to_the_minimum() {
        let rates: Vec<u32> = CommissionPolicy::default().rates().collect();
        assert_eq!(rates, vec![100_000, 10_000, 1_000, 100, 10]);
    }

    #[test]
    fn policy_round_trips_from_fractional_rates() {
        let policy = CommissionPolicy::from_rates(0.10, 10, 0.00001, false);
        assert_eq!(policy, CommissionPolicy::default());
        assert_eq!(policy.level_one_rate(), 0.1);

        let flat = CommissionPolicy::from_rates(0.05, 1, 0.01, true);
        assert_eq!(flat.decay_divisor, 2);
        assert_eq!(flat.rates().collect::<Vec<_>>(), vec![50_000, 25_000, 12_500]);
    }

    #[test]
    fn commission_is_rounded_per_level() {
        let policy = CommissionPolicy::default();
        assert_eq!(policy.commission_for(100_000, 100_000), 10_000);
        assert_eq!(policy.commission_for(100_000, 10), 1);
        assert_eq!(policy.commission_for(33_333, 100_000), 3_333);
        assert_eq!(policy.commission_for(33_335, 100_000), 3_334);
        assert_eq!(policy.commission_for(100, 10), 0);
    }

    #[tokio::test]
    async fn five_level_chain_receives_decaying_commissions() {
        let store = Arc::new(MemoryStore::new());
        let (users, edges) = chain(&store, 6).await;
        let engine = CommissionEngine::new(store.clone(), CommissionPolicy::default());

        let leaf = *users.last().unwrap();
        let report = engine.distribute(leaf, 100_000).await.unwrap();

        let amounts: Vec<i64> = report.credits.iter().map(|c| c.amount).collect();
        assert_eq!(amounts, vec![10_000, 1_000, 100, 10, 1]);
        assert_eq!(report.stop, StopReason::RateExhausted);

        // edges[5] is the leaf's own edge; edges[0] sits beyond the fifth level
        assert_eq!(earned(&store, edges[5]).await, 10_000);
        assert_eq!(earned(&store, edges[1]).await, 1);
        let untouched = store.get_referral(edges[0]).await.unwrap().unwrap();
        assert_eq!(untouched.earned_balance, 0);
        assert_eq!(untouched.status, ReferralStatus::Initiated);
    }

    #[tokio::test]
    async fn distribution_stops_at_the_root() {
        let store = Arc::new(MemoryStore::new());
        let (users, edges) = chain(&store, 2).await;
        let engine = CommissionEngine::new(store.clone(), CommissionPolicy::default());

        let report = engine.distribute(users[2], 50_000).await.unwrap();

        assert_eq!(report.credits.len(), 2);
        assert_eq!(report.stop, StopReason::ReachedRoot);
        assert_eq!(earned(&store, edges[1]).await, 5_000);
        assert_eq!(earned(&store, edges[0]).await, 500);

        let credited = store.get_referral(edges[0]).await.unwrap().unwrap();
        assert_eq!(credited.status, ReferralStatus::Pending);
    }

    #[tokio::test]
    async fn root_user_distributes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let engine = CommissionEngine::new(store, CommissionPolicy::default());

        let report = engine.distribute(Uuid::new_v4(), 10_000).await.unwrap();
        assert!(report.credits.is_empty());
        assert_eq!(report.stop, StopReason::ReachedRoot);
    }

    #[tokio::test]
    async fn negative_amount_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = CommissionEngine::new(store, CommissionPolicy::default());

        let err = engine.distribute(Uuid::new_v4(), -500).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn broken_chain_keeps_partial_credit() {
        let store = Arc::new(MemoryStore::new());
        let (users, edges) = chain(&store, 3).await;
        store.fail_lookups_for_referee(users[2]).await;
        let engine = CommissionEngine::new(store.clone(), CommissionPolicy::default());

        let report = engine.distribute(users[3], 100_000).await.unwrap();

        assert_eq!(report.credits.len(), 1);
        assert!(matches!(report.stop, StopReason::StoreFailure { .. }));
        assert_eq!(earned(&store, edges[2]).await, 10_000);
        assert_eq!(earned(&store, edges[1]).await, 0);
        assert_eq!(engine.stats().broken_chains, 1);
    }

    #[tokio::test]
    async fn broken_chain_can_surface_the_error() {
        let store = Arc::new(MemoryStore::new());
        let (users, edges) = chain(&store, 3).await;
        store.fail_lookups_for_referee(users[2]).await;
        let policy = CommissionPolicy { halt_on_store_error: true, ..CommissionPolicy::default() };
        let engine = CommissionEngine::new(store.clone(), policy);

        let err = engine.distribute(users[3], 100_000).await.unwrap_err();

        assert!(matches!(err, ServiceError::Store(StoreError::Database(_))));
        // the first level was already credited and stays
        assert_eq!(earned(&store, edges[2]).await, 10_000);
    }

    #[tokio::test]
    async fn concurrent_distributions_do_not_lose_updates() {
        let store = Arc::new(MemoryStore::new());
        let (users, edges) = chain(&store, 2).await;
        let engine = CommissionEngine::new(store.clone(), CommissionPolicy::default());
        let leaf = users[2];

        let runs: Vec<_> = (0..20)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.distribute(leaf, 10_000).await })
            })
            .collect();
        for run in runs {
            run.await.unwrap().unwrap();
        }

        assert_eq!(earned(&store, edges[1]).await, 20_000);
        assert_eq!(earned(&store, edges[0]).await, 2_000);
        assert_eq!(engine.stats().runs, 20);
    }

    #[tokio::test]
    async fn chain_ending_on_the_last_paid_level_reaches_the_root() {
        let store = Arc::new(MemoryStore::new());
        let (users, _) = chain(&store, 5).await;
        let engine = CommissionEngine::new(store.clone(), CommissionPolicy::default());

        let report = engine.distribute(users[5], 100_000).await.unwrap();

        assert_eq!(report.credits.len(), 5);
        assert_eq!(report.stop, StopReason::ReachedRoot);
    }

    #[tokio::test]
    async fn repeated_small_distributions_do_not_drift() {
        let store = Arc::new(MemoryStore::new());
        let (users, edges) = chain(&store, 1).await;
        let engine = CommissionEngine::new(store.clone(), CommissionPolicy::default());

        for _ in 0..3 {
            engine.distribute(users[1], 100).await.unwrap();
        }

        assert_eq!(earned(&store, edges[0]).await, 30);
        let edge = store.get_referral(edges[0]).await.unwrap().unwrap();
        assert_eq!(serde_json::to_value(&edge).unwrap()["earnedBalance"], serde_json::json!(0.3));
    }

    #[tokio::test]
    async fn credit_moves_a_completed_edge_back_to_pending() {
        let store = Arc::new(MemoryStore::new());
        let (users, edges) = chain(&store, 2).await;
        store.mark_referral_completed(edges[0]).await.unwrap();
        let engine = CommissionEngine::new(store.clone(), CommissionPolicy::default());

        engine.distribute(users[2], 10_000).await.unwrap();

        let upper = store.get_referral(edges[0]).await.unwrap().unwrap();
        assert_eq!(upper.status, ReferralStatus::Pending);
        assert_eq!(upper.earned_balance, 100);
    }

    #[tokio::test]
    async fn completion_run_leaves_the_completed_edge_completed() {
        let store = Arc::new(MemoryStore::new());
        let (_, edges) = chain(&store, 2).await;
        store.update_referral_base_amount(edges[1], 10_000).await.unwrap();
        let completed = store.mark_referral_completed(edges[1]).await.unwrap().unwrap();
        let engine = CommissionEngine::new(store.clone(), CommissionPolicy::default());

        let report = engine.distribute_completion(&completed).await.unwrap();
        assert_eq!(report.total_credited(), 1_100);

        let own = store.get_referral(edges[1]).await.unwrap().unwrap();
        assert_eq!(own.status, ReferralStatus::Completed);
        assert_eq!(own.earned_balance, 1_000);
        let upper = store.get_referral(edges[0]).await.unwrap().unwrap();
        assert_eq!(upper.status, ReferralStatus::Pending);
    }
}
