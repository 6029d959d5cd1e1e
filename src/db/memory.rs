// db/memory.rs
//! In-process store with the same contract as the Postgres client. Every
//! operation runs under one lock, so increments and compare-and-set updates
//! are atomic here too.
use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{referraldb::ReferralExt, userdb::UserExt, Store, StoreError};

use crate::models::{
    referralmodel::{LineageUpdate, NewReferral, ReferralEdge, ReferralStatus},
    usermodel::{NewUser, User, UserProfile},
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    // insertion order
    referrals: Vec<ReferralEdge>,
    #[cfg(test)]
    failing_referees: HashSet<Uuid>,
}

impl MemoryState {
    fn referral_mut(&mut self, referral_id: Uuid) -> Result<&mut ReferralEdge, StoreError> {
        self.referrals
            .iter_mut()
            .find(|r| r.id == referral_id)
            .ok_or_else(|| StoreError::NotFound("referral".to_string()))
    }

    fn user_mut(&mut self, user_id: Uuid) -> Result<&mut User, StoreError> {
        self.users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound("user".to_string()))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Drops a user record while leaving its edges in place.
    pub async fn remove_user(&self, user_id: Uuid) {
        self.state.write().await.users.remove(&user_id);
    }

    /// Makes every later lookup of the edge for `referee_id` fail.
    pub async fn fail_lookups_for_referee(&self, referee_id: Uuid) {
        self.state.write().await.failing_referees.insert(referee_id);
    }

    /// Writes an edge as-is, skipping every uniqueness and lineage check.
    pub async fn insert_raw_referral(&self, referral: ReferralEdge) {
        self.state.write().await.referrals.push(referral);
    }
}

impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl UserExt for MemoryStore {
    async fn get_user(
        &self,
        user_id: Option<Uuid>,
        wallet_address: Option<&str>,
        referral_code: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let state = self.state.read().await;

        let user = if let Some(user_id) = user_id {
            state.users.get(&user_id)
        } else if let Some(wallet_address) = wallet_address {
            state.users.values().find(|u| u.wallet_address == wallet_address)
        } else if let Some(referral_code) = referral_code {
            state
                .users
                .values()
                .find(|u| u.referral_code.as_deref() == Some(referral_code))
        } else {
            None
        };

        Ok(user.cloned())
    }

    async fn get_user_profiles(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<UserProfile>, StoreError> {
        let state = self.state.read().await;
        let wanted: HashSet<&Uuid> = user_ids.iter().collect();

        Ok(state
            .users
            .values()
            .filter(|u| wanted.contains(&u.id))
            .map(User::profile)
            .collect())
    }

    async fn save_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut state = self.state.write().await;

        let duplicate = state.users.values().any(|u| {
            u.wallet_address == new_user.wallet_address
                || u.username == new_user.username
                || (new_user.referral_code.is_some() && u.referral_code == new_user.referral_code)
        });
        if duplicate {
            return Err(StoreError::Conflict("user".to_string()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            full_name: new_user.full_name,
            username: new_user.username,
            email: new_user.email,
            wallet_address: new_user.wallet_address,
            referral_code: new_user.referral_code,
            referral_ids: Vec::new(),
            total_commission: 0,
            created_at: now,
            updated_at: now,
        };

        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user_referral_code(
        &self,
        user_id: Uuid,
        referral_code: String,
    ) -> Result<User, StoreError> {
        let mut state = self.state.write().await;

        let taken = state
            .users
            .values()
            .any(|u| u.id != user_id && u.referral_code.as_deref() == Some(referral_code.as_str()));
        if taken {
            return Err(StoreError::Conflict("referral code".to_string()));
        }

        let user = state.user_mut(user_id)?;
        user.referral_code = Some(referral_code);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn update_user_total_commission(
        &self,
        user_id: Uuid,
        total_commission_cents: i64,
    ) -> Result<User, StoreError> {
        let mut state = self.state.write().await;
        let user = state.user_mut(user_id)?;
        user.total_commission = total_commission_cents;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn push_user_referral(
        &self,
        user_id: Uuid,
        referral_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let user = state.user_mut(user_id)?;
        user.referral_ids.push(referral_id);
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn pull_user_referral(
        &self,
        user_id: Uuid,
        referral_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(user) = state.users.get_mut(&user_id) {
            user.referral_ids.retain(|id| *id != referral_id);
            user.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl ReferralExt for MemoryStore {
    async fn get_referral(&self, referral_id: Uuid) -> Result<Option<ReferralEdge>, StoreError> {
        let state = self.state.read().await;
        Ok(state.referrals.iter().find(|r| r.id == referral_id).cloned())
    }

    async fn get_referrals_by_ids(
        &self,
        referral_ids: &[Uuid],
    ) -> Result<Vec<ReferralEdge>, StoreError> {
        let state = self.state.read().await;
        let wanted: HashSet<&Uuid> = referral_ids.iter().collect();

        Ok(state
            .referrals
            .iter()
            .filter(|r| wanted.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn get_referral_by_referee(
        &self,
        referee_id: Uuid,
    ) -> Result<Option<ReferralEdge>, StoreError> {
        let state = self.state.read().await;

        #[cfg(test)]
        if state.failing_referees.contains(&referee_id) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        Ok(state.referrals.iter().find(|r| r.referee_id == referee_id).cloned())
    }

    async fn get_referrals_by_referrer(
        &self,
        referrer_id: Uuid,
    ) -> Result<Vec<ReferralEdge>, StoreError> {
        let state = self.state.read().await;

        Ok(state
            .referrals
            .iter()
            .rev()
            .filter(|r| r.referrer_id == referrer_id)
            .cloned()
            .collect())
    }

    async fn get_referrals(&self) -> Result<Vec<ReferralEdge>, StoreError> {
        let state = self.state.read().await;
        Ok(state.referrals.iter().rev().cloned().collect())
    }

    async fn count_referrals_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(state.referrals.iter().filter(|r| r.created_at >= since).count() as i64)
    }

    async fn get_descendant_edges(&self, user_id: Uuid) -> Result<Vec<ReferralEdge>, StoreError> {
        let state = self.state.read().await;

        let mut by_referrer: HashMap<Uuid, Vec<&ReferralEdge>> = HashMap::new();
        for referral in &state.referrals {
            by_referrer.entry(referral.referrer_id).or_default().push(referral);
        }

        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut queue: VecDeque<Uuid> = VecDeque::from([user_id]);
        let mut edges = Vec::new();

        while let Some(referrer_id) = queue.pop_front() {
            for referral in by_referrer.get(&referrer_id).into_iter().flatten() {
                if seen.insert(referral.id) {
                    queue.push_back(referral.referee_id);
                    edges.push((*referral).clone());
                }
            }
        }

        Ok(edges)
    }

    async fn save_referral(&self, new_referral: NewReferral) -> Result<ReferralEdge, StoreError> {
        let mut state = self.state.write().await;

        if state.referrals.iter().any(|r| r.referee_id == new_referral.referee_id) {
            return Err(StoreError::Conflict("referral for referee".to_string()));
        }

        let now = Utc::now();
        let referral = ReferralEdge {
            id: Uuid::new_v4(),
            referrer_id: new_referral.referrer_id,
            referee_id: new_referral.referee_id,
            referral_code: new_referral.referral_code,
            level: new_referral.level,
            ancestors: new_referral.ancestors,
            base_amount: 0,
            earned_balance: 0,
            status: ReferralStatus::Initiated,
            created_at: now,
            updated_at: now,
        };

        state.referrals.push(referral.clone());
        Ok(referral)
    }

    async fn credit_commission(
        &self,
        referral_id: Uuid,
        amount_cents: i64,
        status: ReferralStatus,
    ) -> Result<ReferralEdge, StoreError> {
        let mut state = self.state.write().await;
        let referral = state.referral_mut(referral_id)?;

        referral.earned_balance += amount_cents;
        referral.status = status;
        referral.updated_at = Utc::now();

        Ok(referral.clone())
    }

    async fn mark_referral_completed(
        &self,
        referral_id: Uuid,
    ) -> Result<Option<ReferralEdge>, StoreError> {
        let mut state = self.state.write().await;

        match state.referrals.iter_mut().find(|r| r.id == referral_id) {
            Some(referral) if referral.status != ReferralStatus::Completed => {
                referral.status = ReferralStatus::Completed;
                referral.updated_at = Utc::now();
                Ok(Some(referral.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_referral_status(
        &self,
        referral_id: Uuid,
        status: ReferralStatus,
    ) -> Result<ReferralEdge, StoreError> {
        let mut state = self.state.write().await;
        let referral = state.referral_mut(referral_id)?;
        referral.status = status;
        referral.updated_at = Utc::now();
        Ok(referral.clone())
    }

    async fn update_referral_base_amount(
        &self,
        referral_id: Uuid,
        base_amount_cents: i64,
    ) -> Result<ReferralEdge, StoreError> {
        let mut state = self.state.write().await;
        let referral = state.referral_mut(referral_id)?;
        referral.base_amount = base_amount_cents;
        referral.updated_at = Utc::now();
        Ok(referral.clone())
    }

    async fn rewrite_lineage(&self, updates: &[LineageUpdate]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        let missing = updates
            .iter()
            .any(|u| !state.referrals.iter().any(|r| r.id == u.referral_id));
        if missing {
            return Err(StoreError::NotFound("referral".to_string()));
        }

        let now = Utc::now();
        for update in updates {
            let referral = state.referral_mut(update.referral_id)?;
            referral.referrer_id = update.referrer_id;
            referral.level = update.level;
            referral.ancestors = update.ancestors.clone();
            referral.updated_at = now;
        }

        Ok(())
    }

    async fn delete_referral(&self, referral_id: Uuid) -> Result<Option<ReferralEdge>, StoreError> {
        let mut state = self.state.write().await;

        let position = state.referrals.iter().position(|r| r.id == referral_id);
        Ok(position.map(|index| state.referrals.remove(index)))
    }
}
