// db/referraldb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{db::DBClient, StoreError};

use crate::models::referralmodel::{LineageUpdate, NewReferral, ReferralEdge, ReferralStatus};

#[async_trait]
pub trait ReferralExt: Send + Sync {
    async fn get_referral(&self, referral_id: Uuid) -> Result<Option<ReferralEdge>, StoreError>;

    async fn get_referrals_by_ids(
        &self,
        referral_ids: &[Uuid],
    ) -> Result<Vec<ReferralEdge>, StoreError>;

    /// The single edge through which `referee_id` was referred, if any.
    async fn get_referral_by_referee(
        &self,
        referee_id: Uuid,
    ) -> Result<Option<ReferralEdge>, StoreError>;

    /// Newest first.
    async fn get_referrals_by_referrer(
        &self,
        referrer_id: Uuid,
    ) -> Result<Vec<ReferralEdge>, StoreError>;

    /// Newest first.
    async fn get_referrals(&self) -> Result<Vec<ReferralEdge>, StoreError>;

    async fn count_referrals_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError>;

    /// Every edge below `user_id`, fetched in bulk. Each edge appears once
    /// even if the stored data contains a cycle.
    async fn get_descendant_edges(&self, user_id: Uuid) -> Result<Vec<ReferralEdge>, StoreError>;

    /// Fails with `Conflict` when the referee already has an edge.
    async fn save_referral(&self, new_referral: NewReferral) -> Result<ReferralEdge, StoreError>;

    /// Atomically adds `amount_cents` to the earned balance and sets the
    /// status in the same write.
    async fn credit_commission(
        &self,
        referral_id: Uuid,
        amount_cents: i64,
        status: ReferralStatus,
    ) -> Result<ReferralEdge, StoreError>;

    /// Compare-and-set into `Completed`. `None` when the edge was already
    /// completed (or does not exist).
    async fn mark_referral_completed(
        &self,
        referral_id: Uuid,
    ) -> Result<Option<ReferralEdge>, StoreError>;

    async fn update_referral_status(
        &self,
        referral_id: Uuid,
        status: ReferralStatus,
    ) -> Result<ReferralEdge, StoreError>;

    async fn update_referral_base_amount(
        &self,
        referral_id: Uuid,
        base_amount_cents: i64,
    ) -> Result<ReferralEdge, StoreError>;

    /// Applies all updates or none.
    async fn rewrite_lineage(&self, updates: &[LineageUpdate]) -> Result<(), StoreError>;

    async fn delete_referral(&self, referral_id: Uuid) -> Result<Option<ReferralEdge>, StoreError>;
}

#[async_trait]
impl ReferralExt for DBClient {
    async fn get_referral(&self, referral_id: Uuid) -> Result<Option<ReferralEdge>, StoreError> {
        let referral = sqlx::query_as::<_, ReferralEdge>(
            r#"
            SELECT id, referrer_id, referee_id, referral_code, level, ancestors,
                   base_amount, earned_balance, status, created_at, updated_at
            FROM referrals
            WHERE id = $1
            "#
        )
        .bind(referral_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(referral)
    }

    async fn get_referrals_by_ids(
        &self,
        referral_ids: &[Uuid],
    ) -> Result<Vec<ReferralEdge>, StoreError> {
        if referral_ids.is_empty() {
            return Ok(Vec::new());
        }

        let referrals = sqlx::query_as::<_, ReferralEdge>(
            r#"
            SELECT id, referrer_id, referee_id, referral_code, level, ancestors,
                   base_amount, earned_balance, status, created_at, updated_at
            FROM referrals
            WHERE id = ANY($1)
            "#
        )
        .bind(referral_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(referrals)
    }

    async fn get_referral_by_referee(
        &self,
        referee_id: Uuid,
    ) -> Result<Option<ReferralEdge>, StoreError> {
        let referral = sqlx::query_as::<_, ReferralEdge>(
            r#"
            SELECT id, referrer_id, referee_id, referral_code, level, ancestors,
                   base_amount, earned_balance, status, created_at, updated_at
            FROM referrals
            WHERE referee_id = $1
            "#
        )
        .bind(referee_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(referral)
    }

    async fn get_referrals_by_referrer(
        &self,
        referrer_id: Uuid,
    ) -> Result<Vec<ReferralEdge>, StoreError> {
        let referrals = sqlx::query_as::<_, ReferralEdge>(
            r#"
            SELECT id, referrer_id, referee_id, referral_code, level, ancestors,
                   base_amount, earned_balance, status, created_at, updated_at
            FROM referrals
            WHERE referrer_id = $1
            ORDER BY created_at DESC
            "#
        )
        .bind(referrer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(referrals)
    }

    async fn get_referrals(&self) -> Result<Vec<ReferralEdge>, StoreError> {
        let referrals = sqlx::query_as::<_, ReferralEdge>(
            r#"
            SELECT id, referrer_id, referee_id, referral_code, level, ancestors,
                   base_amount, earned_balance, status, created_at, updated_at
            FROM referrals
            ORDER BY created_at DESC
            "#
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(referrals)
    }

    async fn count_referrals_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM referrals
            WHERE created_at >= $1
            "#
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn get_descendant_edges(&self, user_id: Uuid) -> Result<Vec<ReferralEdge>, StoreError> {
        // UNION (not UNION ALL) drops rows already visited, so the walk ends
        // even on corrupted data.
        let referrals = sqlx::query_as::<_, ReferralEdge>(
            r#"
            WITH RECURSIVE subtree AS (
                SELECT r.id, r.referrer_id, r.referee_id, r.referral_code, r.level, r.ancestors,
                       r.base_amount, r.earned_balance, r.status, r.created_at, r.updated_at
                FROM referrals r
                WHERE r.referrer_id = $1
                UNION
                SELECT r.id, r.referrer_id, r.referee_id, r.referral_code, r.level, r.ancestors,
                       r.base_amount, r.earned_balance, r.status, r.created_at, r.updated_at
                FROM referrals r
                INNER JOIN subtree s ON r.referrer_id = s.referee_id
            )
            SELECT id, referrer_id, referee_id, referral_code, level, ancestors,
                   base_amount, earned_balance, status, created_at, updated_at
            FROM subtree
            ORDER BY created_at ASC
            "#
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(referrals)
    }

    async fn save_referral(&self, new_referral: NewReferral) -> Result<ReferralEdge, StoreError> {
        sqlx::query_as::<_, ReferralEdge>(
            r#"
            INSERT INTO referrals (referrer_id, referee_id, referral_code, level, ancestors)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, referrer_id, referee_id, referral_code, level, ancestors,
                      base_amount, earned_balance, status, created_at, updated_at
            "#
        )
        .bind(new_referral.referrer_id)
        .bind(new_referral.referee_id)
        .bind(new_referral.referral_code)
        .bind(new_referral.level)
        .bind(new_referral.ancestors)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "referral for referee"))
    }

    async fn credit_commission(
        &self,
        referral_id: Uuid,
        amount_cents: i64,
        status: ReferralStatus,
    ) -> Result<ReferralEdge, StoreError> {
        sqlx::query_as::<_, ReferralEdge>(
            r#"
            UPDATE referrals
            SET earned_balance = earned_balance + $2,
                status = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, referrer_id, referee_id, referral_code, level, ancestors,
                      base_amount, earned_balance, status, created_at, updated_at
            "#
        )
        .bind(referral_id)
        .bind(amount_cents)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "referral"))
    }

    async fn mark_referral_completed(
        &self,
        referral_id: Uuid,
    ) -> Result<Option<ReferralEdge>, StoreError> {
        let referral = sqlx::query_as::<_, ReferralEdge>(
            r#"
            UPDATE referrals
            SET status = 'completed'::referral_status, updated_at = NOW()
            WHERE id = $1 AND status <> 'completed'::referral_status
            RETURNING id, referrer_id, referee_id, referral_code, level, ancestors,
                      base_amount, earned_balance, status, created_at, updated_at
            "#
        )
        .bind(referral_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(referral)
    }

    async fn update_referral_status(
        &self,
        referral_id: Uuid,
        status: ReferralStatus,
    ) -> Result<ReferralEdge, StoreError> {
        sqlx::query_as::<_, ReferralEdge>(
            r#"
            UPDATE referrals
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, referrer_id, referee_id, referral_code, level, ancestors,
                      base_amount, earned_balance, status, created_at, updated_at
            "#
        )
        .bind(referral_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "referral"))
    }

    async fn update_referral_base_amount(
        &self,
        referral_id: Uuid,
        base_amount_cents: i64,
    ) -> Result<ReferralEdge, StoreError> {
        sqlx::query_as::<_, ReferralEdge>(
            r#"
            UPDATE referrals
            SET base_amount = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, referrer_id, referee_id, referral_code, level, ancestors,
                      base_amount, earned_balance, status, created_at, updated_at
            "#
        )
        .bind(referral_id)
        .bind(base_amount_cents)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "referral"))
    }

    async fn rewrite_lineage(&self, updates: &[LineageUpdate]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for update in updates {
            let result = sqlx::query(
                r#"
                UPDATE referrals
                SET referrer_id = $2, level = $3, ancestors = $4, updated_at = NOW()
                WHERE id = $1
                "#
            )
            .bind(update.referral_id)
            .bind(update.referrer_id)
            .bind(update.level)
            .bind(&update.ancestors)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(StoreError::NotFound("referral".to_string()));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_referral(&self, referral_id: Uuid) -> Result<Option<ReferralEdge>, StoreError> {
        let referral = sqlx::query_as::<_, ReferralEdge>(
            r#"
            DELETE FROM referrals
            WHERE id = $1
            RETURNING id, referrer_id, referee_id, referral_code, level, ancestors,
                      base_amount, earned_balance, status, created_at, updated_at
            "#
        )
        .bind(referral_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(referral)
    }
}
