// db/userdb.rs
use async_trait::async_trait;
use uuid::Uuid;

use super::{db::DBClient, StoreError};

use crate::models::usermodel::{NewUser, User, UserProfile};

#[async_trait]
pub trait UserExt: Send + Sync {
    /// findOne on users: by id, else wallet address, else referral code.
    async fn get_user(
        &self,
        user_id: Option<Uuid>,
        wallet_address: Option<&str>,
        referral_code: Option<&str>,
    ) -> Result<Option<User>, StoreError>;

    /// Resolve many ids in one round trip; unknown ids are left out.
    async fn get_user_profiles(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<UserProfile>, StoreError>;

    async fn save_user(&self, new_user: NewUser) -> Result<User, StoreError>;

    async fn update_user_referral_code(
        &self,
        user_id: Uuid,
        referral_code: String,
    ) -> Result<User, StoreError>;

    async fn update_user_total_commission(
        &self,
        user_id: Uuid,
        total_commission_cents: i64,
    ) -> Result<User, StoreError>;

    async fn push_user_referral(
        &self,
        user_id: Uuid,
        referral_id: Uuid,
    ) -> Result<(), StoreError>;

    async fn pull_user_referral(
        &self,
        user_id: Uuid,
        referral_id: Uuid,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl UserExt for DBClient {
    async fn get_user(
        &self,
        user_id: Option<Uuid>,
        wallet_address: Option<&str>,
        referral_code: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let mut user: Option<User> = None;

        if let Some(user_id) = user_id {
            user = sqlx::query_as::<_, User>(
                r#"
                SELECT
                    id, full_name, username, email, wallet_address,
                    referral_code, referral_ids, total_commission,
                    created_at, updated_at
                FROM users
                WHERE id = $1
                "#
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        } else if let Some(wallet_address) = wallet_address {
            user = sqlx::query_as::<_, User>(
                r#"
                SELECT
                    id, full_name, username, email, wallet_address,
                    referral_code, referral_ids, total_commission,
                    created_at, updated_at
                FROM users
                WHERE wallet_address = $1
                "#
            )
            .bind(wallet_address)
            .fetch_optional(&self.pool)
            .await?;
        } else if let Some(referral_code) = referral_code {
            user = sqlx::query_as::<_, User>(
                r#"
                SELECT
                    id, full_name, username, email, wallet_address,
                    referral_code, referral_ids, total_commission,
                    created_at, updated_at
                FROM users
                WHERE referral_code = $1
                "#
            )
            .bind(referral_code)
            .fetch_optional(&self.pool)
            .await?;
        }

        Ok(user)
    }

    async fn get_user_profiles(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<UserProfile>, StoreError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let profiles = sqlx::query_as::<_, UserProfile>(
            r#"
            SELECT id, full_name, email
            FROM users
            WHERE id = ANY($1)
            "#
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(profiles)
    }

    async fn save_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (full_name, username, email, wallet_address, referral_code)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING
                id, full_name, username, email, wallet_address,
                referral_code, referral_ids, total_commission,
                created_at, updated_at
            "#
        )
        .bind(new_user.full_name)
        .bind(new_user.username)
        .bind(new_user.email)
        .bind(new_user.wallet_address)
        .bind(new_user.referral_code)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "user"))
    }

    async fn update_user_referral_code(
        &self,
        user_id: Uuid,
        referral_code: String,
    ) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET referral_code = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING
                id, full_name, username, email, wallet_address,
                referral_code, referral_ids, total_commission,
                created_at, updated_at
            "#
        )
        .bind(referral_code)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "referral code"))
    }

    async fn update_user_total_commission(
        &self,
        user_id: Uuid,
        total_commission_cents: i64,
    ) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET total_commission = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING
                id, full_name, username, email, wallet_address,
                referral_code, referral_ids, total_commission,
                created_at, updated_at
            "#
        )
        .bind(total_commission_cents)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, "user"))
    }

    async fn push_user_referral(
        &self,
        user_id: Uuid,
        referral_id: Uuid,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET referral_ids = array_append(referral_ids, $2), updated_at = NOW()
            WHERE id = $1
            "#
        )
        .bind(user_id)
        .bind(referral_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("user".to_string()));
        }

        Ok(())
    }

    async fn pull_user_referral(
        &self,
        user_id: Uuid,
        referral_id: Uuid,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET referral_ids = array_remove(referral_ids, $2), updated_at = NOW()
            WHERE id = $1
            "#
        )
        .bind(user_id)
        .bind(referral_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
