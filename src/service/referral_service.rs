// service/referral_service.rs
use std::{collections::HashMap, sync::Arc};

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    db::{referraldb::ReferralExt, userdb::UserExt, Store, StoreError},
    dtos::referraldtos::ReferralUpdate,
    models::{
        referralmodel::{LineageUpdate, NewReferral, PopulatedReferral, ReferralEdge, ReferralStatus, ReferralTree},
        usermodel::User,
    },
    service::{
        commission::{CommissionEngine, DistributionReport},
        error::ServiceError,
        graph::{lineage_through, user_ids_of, ReferralGraph},
    },
    utils::currency::{from_cents, parse_amount_to_cents},
};

const GROWTH_WINDOW_DAYS: i64 = 7;

/// Every referral with both parties resolved, newest first.
#[derive(Debug, Clone)]
pub struct ReferralListing {
    pub referrals: Vec<PopulatedReferral>,
    pub total_referrals: usize,
    pub growth: String,
}

#[derive(Debug, Clone)]
pub struct ReferralUpdateOutcome {
    pub referral: ReferralEdge,
    /// Present when this update completed the referral.
    pub distribution: Option<DistributionReport>,
}

#[derive(Debug, Clone)]
pub struct ReferralService {
    store: Arc<dyn Store>,
    engine: CommissionEngine,
}

impl ReferralService {
    pub fn new(store: Arc<dyn Store>, engine: CommissionEngine) -> Self {
        Self { store, engine }
    }

    pub fn engine(&self) -> &CommissionEngine {
        &self.engine
    }

    /// Resolves the owner of `referral_code`. When the redeeming wallet is
    /// known, redeeming one's own code is refused.
    pub async fn check_referral_code(
        &self,
        referral_code: &str,
        wallet_address: Option<&str>,
    ) -> Result<User, ServiceError> {
        let referrer = self
            .store
            .get_user(None, None, Some(referral_code))
            .await?
            .ok_or_else(|| ServiceError::ReferralCodeNotFound(referral_code.to_string()))?;

        if let Some(wallet_address) = wallet_address {
            if referrer.wallet_address == wallet_address {
                return Err(ServiceError::SelfReferral(referrer.id));
            }
        }

        Ok(referrer)
    }

    pub async fn create_referral(
        &self,
        referrer_id: Uuid,
        referee_id: Uuid,
        referral_code: &str,
    ) -> Result<ReferralEdge, ServiceError> {
        if referrer_id == referee_id {
            return Err(ServiceError::SelfReferral(referee_id));
        }

        if self.store.get_referral_by_referee(referee_id).await?.is_some() {
            return Err(ServiceError::AlreadyReferred(referee_id));
        }

        if self.store.get_user(Some(referrer_id), None, None).await?.is_none() {
            return Err(ServiceError::UserNotFound(referrer_id));
        }
        if self.store.get_user(Some(referee_id), None, None).await?.is_none() {
            return Err(ServiceError::UserNotFound(referee_id));
        }

        self.link(referrer_id, referee_id, referral_code).await
    }

    /// Links the owner of `wallet_address` under the owner of `referral_code`.
    pub async fn create_referral_by_wallet(
        &self,
        referral_code: &str,
        wallet_address: &str,
    ) -> Result<ReferralEdge, ServiceError> {
        let referee = self
            .store
            .get_user(None, Some(wallet_address), None)
            .await?
            .ok_or_else(|| ServiceError::RefereeNotFound(wallet_address.to_string()))?;

        self.refer_user(referral_code, &referee).await
    }

    /// Links an already loaded `referee` under the owner of `referral_code`.
    pub async fn refer_user(
        &self,
        referral_code: &str,
        referee: &User,
    ) -> Result<ReferralEdge, ServiceError> {
        let referrer = self
            .store
            .get_user(None, None, Some(referral_code))
            .await?
            .ok_or_else(|| ServiceError::ReferrerNotFound(referral_code.to_string()))?;

        if referrer.id == referee.id {
            return Err(ServiceError::SelfReferral(referee.id));
        }

        if self.store.get_referral_by_referee(referee.id).await?.is_some() {
            return Err(ServiceError::AlreadyReferred(referee.id));
        }

        self.link(referrer.id, referee.id, referral_code).await
    }

    async fn link(
        &self,
        referrer_id: Uuid,
        referee_id: Uuid,
        referral_code: &str,
    ) -> Result<ReferralEdge, ServiceError> {
        // A root referee may already sit above the referrer.
        let below_referee = self.store.get_descendant_edges(referee_id).await?;
        if ReferralGraph::new(below_referee, Vec::new()).reaches(referee_id, referrer_id) {
            return Err(ServiceError::ReferralCycle { referrer: referrer_id, referee: referee_id });
        }

        let (level, ancestors) = match self.store.get_referral_by_referee(referrer_id).await? {
            Some(parent) => (parent.level + 1, lineage_through(&parent.ancestors, parent.id)),
            None => (1, Vec::new()),
        };

        let referral = self
            .store
            .save_referral(NewReferral {
                referrer_id,
                referee_id,
                referral_code: referral_code.to_string(),
                level,
                ancestors,
            })
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => ServiceError::AlreadyReferred(referee_id),
                other => ServiceError::Store(other),
            })?;

        self.store.push_user_referral(referrer_id, referral.id).await?;

        tracing::info!(
            "Referral {} created: {} -> {} at level {}",
            referral.id,
            referrer_id,
            referee_id,
            referral.level
        );

        Ok(referral)
    }

    pub async fn list_referrals(&self) -> Result<ReferralListing, ServiceError> {
        let edges = self.store.get_referrals().await?;
        let total_referrals = edges.len();

        let since = Utc::now() - Duration::days(GROWTH_WINDOW_DAYS);
        let recent = self.store.count_referrals_since(since).await?;

        Ok(ReferralListing {
            referrals: self.populate(edges).await?,
            total_referrals,
            growth: growth_percentage(recent, total_referrals),
        })
    }

    pub async fn referrals_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PopulatedReferral>, ServiceError> {
        let edges = self.store.get_referrals_by_referrer(user_id).await?;
        self.populate(edges).await
    }

    /// The wallet owner together with the referrals they made.
    pub async fn referrals_by_wallet(
        &self,
        wallet_address: &str,
    ) -> Result<(User, Vec<PopulatedReferral>), ServiceError> {
        let user = self.user_by_wallet(wallet_address).await?;
        let referrals = self.referrals_by_user(user.id).await?;
        Ok((user, referrals))
    }

    pub async fn tree_for_user(&self, user_id: Uuid) -> Result<ReferralTree, ServiceError> {
        let user = self
            .store
            .get_user(Some(user_id), None, None)
            .await?
            .ok_or(ServiceError::UserNotFound(user_id))?;
        self.build_tree(&user).await
    }

    pub async fn tree_for_wallet(&self, wallet_address: &str) -> Result<ReferralTree, ServiceError> {
        let user = self.user_by_wallet(wallet_address).await?;
        self.build_tree(&user).await
    }

    /// Loads the user's own edge, its ancestor edges and the whole subtree in
    /// four bulk reads, then walks them in memory.
    async fn build_tree(&self, user: &User) -> Result<ReferralTree, ServiceError> {
        let mut edges = self.store.get_descendant_edges(user.id).await?;

        if let Some(own_edge) = self.store.get_referral_by_referee(user.id).await? {
            let ancestor_edges = self.store.get_referrals_by_ids(&own_edge.ancestors).await?;
            edges.extend(ancestor_edges);
            edges.push(own_edge);
        }

        let profiles = self.store.get_user_profiles(&user_ids_of(&edges)).await?;
        let graph = ReferralGraph::new(edges, profiles);

        Ok(graph.tree(user.profile()))
    }

    /// Applies `update` to a referral. Moving it into `Completed` from any
    /// other status distributes its base amount up the chain.
    pub async fn update_referral(
        &self,
        referral_id: Uuid,
        update: ReferralUpdate,
    ) -> Result<ReferralUpdateOutcome, ServiceError> {
        if update.is_empty() {
            return Err(ServiceError::EmptyUpdate);
        }
        let base_amount = match update.commission {
            Some(commission) if commission < 0.0 => {
                return Err(ServiceError::NegativeCommission(commission));
            }
            Some(commission) => {
                Some(parse_amount_to_cents(commission).map_err(ServiceError::Validation)?)
            }
            None => None,
        };

        let mut referral = self
            .store
            .get_referral(referral_id)
            .await?
            .ok_or(ServiceError::ReferralNotFound(referral_id))?;

        if let Some(base_amount) = base_amount {
            referral = self.store.update_referral_base_amount(referral_id, base_amount).await?;
        }

        let mut distribution = None;

        match update.status {
            Some(ReferralStatus::Completed) => {
                match self.store.mark_referral_completed(referral_id).await? {
                    Some(completed) => {
                        tracing::info!(
                            "Referral {} completed, distributing {:.2}",
                            referral_id,
                            from_cents(completed.base_amount)
                        );
                        let report = self.engine.distribute_completion(&completed).await?;
                        distribution = Some(report);

                        // the edge's own referrer was just credited
                        referral = self
                            .store
                            .get_referral(referral_id)
                            .await?
                            .ok_or(ServiceError::ReferralNotFound(referral_id))?;
                    }
                    None => {
                        tracing::debug!("Referral {} already completed", referral_id);
                    }
                }
            }
            Some(status) if status != referral.status => {
                referral = self.store.update_referral_status(referral_id, status).await?;
                tracing::info!("Referral {} is now {}", referral_id, status.to_str());
            }
            _ => {}
        }

        Ok(ReferralUpdateOutcome { referral, distribution })
    }

    /// Credits the chain above the wallet owner with shares of
    /// `investment_amount`.
    pub async fn distribute_by_wallet(
        &self,
        wallet_address: &str,
        investment_amount: f64,
    ) -> Result<DistributionReport, ServiceError> {
        let investment_cents = parse_amount_to_cents(investment_amount)
            .ok()
            .filter(|cents| *cents > 0)
            .ok_or_else(|| {
                ServiceError::Validation("Investment amount must be positive.".to_string())
            })?;

        let referee = self
            .store
            .get_user(None, Some(wallet_address), None)
            .await?
            .ok_or_else(|| ServiceError::RefereeNotFound(wallet_address.to_string()))?;

        self.engine.distribute(referee.id, investment_cents).await
    }

    /// Moves a referral under the referee of `new_parent_id` and recomputes
    /// level and ancestors for it and everything below it.
    pub async fn reparent(
        &self,
        referral_id: Uuid,
        new_parent_id: Uuid,
    ) -> Result<ReferralEdge, ServiceError> {
        let referral = self
            .store
            .get_referral(referral_id)
            .await?
            .ok_or(ServiceError::ReferralNotFound(referral_id))?;
        let parent = self
            .store
            .get_referral(new_parent_id)
            .await?
            .ok_or(ServiceError::ParentReferralNotFound(new_parent_id))?;

        let subtree = ReferralGraph::new(
            self.store.get_descendant_edges(referral.referee_id).await?,
            Vec::new(),
        );
        if subtree.reaches(referral.referee_id, parent.referee_id) {
            return Err(ServiceError::ReferralCycle {
                referrer: parent.referee_id,
                referee: referral.referee_id,
            });
        }

        let moved = LineageUpdate {
            referral_id,
            referrer_id: parent.referee_id,
            level: parent.level + 1,
            ancestors: lineage_through(&parent.ancestors, parent.id),
        };

        let mut updates = vec![moved.clone()];
        updates.extend(subtree.relineage(&moved, referral.referee_id));
        self.store.rewrite_lineage(&updates).await?;

        if referral.referrer_id != moved.referrer_id {
            self.store.pull_user_referral(referral.referrer_id, referral_id).await?;
            self.store.push_user_referral(moved.referrer_id, referral_id).await?;
        }

        tracing::info!(
            "Referral {} moved under referral {}; {} edge(s) rewritten",
            referral_id,
            new_parent_id,
            updates.len()
        );

        self.store
            .get_referral(referral_id)
            .await?
            .ok_or(ServiceError::ReferralNotFound(referral_id))
    }

    pub async fn delete_referral(&self, referral_id: Uuid) -> Result<ReferralEdge, ServiceError> {
        let referral = self
            .store
            .delete_referral(referral_id)
            .await?
            .ok_or(ServiceError::ReferralNotFound(referral_id))?;

        self.store.pull_user_referral(referral.referrer_id, referral.id).await?;

        tracing::warn!(
            "Referral {} ({} -> {}) deleted",
            referral.id,
            referral.referrer_id,
            referral.referee_id
        );

        Ok(referral)
    }

    async fn user_by_wallet(&self, wallet_address: &str) -> Result<User, ServiceError> {
        self.store
            .get_user(None, Some(wallet_address), None)
            .await?
            .ok_or_else(|| ServiceError::WalletNotFound(wallet_address.to_string()))
    }

    async fn populate(
        &self,
        edges: Vec<ReferralEdge>,
    ) -> Result<Vec<PopulatedReferral>, ServiceError> {
        let profiles: HashMap<Uuid, _> = self
            .store
            .get_user_profiles(&user_ids_of(&edges))
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        Ok(edges
            .into_iter()
            .map(|referral| PopulatedReferral {
                referrer: profiles.get(&referral.referrer_id).cloned(),
                referee: profiles.get(&referral.referee_id).cloned(),
                referral,
            })
            .collect())
    }
}

fn growth_percentage(recent: i64, total: usize) -> String {
    if total == 0 {
        return "0".to_string();
    }
    format!("{:.2}", recent as f64 / total as f64 * 100.0)
}
