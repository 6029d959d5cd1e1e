// service/user_service.rs
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::{referraldb::ReferralExt, userdb::UserExt, Store, StoreError},
    dtos::userdtos::{CreateUserDto, RegisterUserDto},
    models::{
        referralmodel::ReferralEdge,
        usermodel::{NewUser, User},
    },
    service::{
        error::ServiceError,
        referral::{generate_referral_code, generate_referral_link},
        referral_service::ReferralService,
    },
};

const CODE_ATTEMPTS: usize = 5;

/// A user as shown on their profile page.
#[derive(Debug, Clone)]
pub struct UserDetails {
    pub user: User,
    pub referral_link: String,
    /// Everything distributions have credited across the user's referrals,
    /// in cents.
    pub total_earned: i64,
}

#[derive(Debug, Clone)]
pub struct UserService {
    store: Arc<dyn Store>,
    referral_service: ReferralService,
    app_url: String,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>, referral_service: ReferralService, app_url: String) -> Self {
        Self {
            store,
            referral_service,
            app_url,
        }
    }

    pub async fn create_user(&self, dto: CreateUserDto) -> Result<User, ServiceError> {
        if self
            .store
            .get_user(None, Some(dto.wallet_address.as_str()), None)
            .await?
            .is_some()
        {
            return Err(ServiceError::WalletTaken(dto.wallet_address));
        }

        let user = self
            .store
            .save_user(NewUser {
                full_name: dto.full_name,
                username: dto.username,
                email: dto.email,
                wallet_address: dto.wallet_address,
                referral_code: None,
            })
            .await?;

        tracing::info!("User {} created for wallet {}", user.id, user.wallet_address);

        self.ensure_referral_code(user).await
    }

    /// Creates the user and, when a code is given, links them under its
    /// owner. An unknown code is rejected before anything is written.
    pub async fn register(
        &self,
        dto: RegisterUserDto,
    ) -> Result<(User, Option<ReferralEdge>), ServiceError> {
        let referral_code = dto.referral_code.clone();

        if let Some(code) = &referral_code {
            self.referral_service
                .check_referral_code(code, Some(dto.wallet_address.as_str()))
                .await?;
        }

        let user = self
            .create_user(CreateUserDto {
                full_name: dto.full_name,
                username: dto.username,
                email: dto.email,
                wallet_address: dto.wallet_address,
            })
            .await?;

        let referral = match referral_code {
            Some(code) => Some(self.referral_service.refer_user(&code, &user).await?),
            None => None,
        };

        Ok((user, referral))
    }

    pub async fn get_user_details(&self, user_id: Uuid) -> Result<UserDetails, ServiceError> {
        let user = self
            .store
            .get_user(Some(user_id), None, None)
            .await?
            .ok_or(ServiceError::UserNotFound(user_id))?;
        self.details(user).await
    }

    pub async fn get_user_details_by_wallet(
        &self,
        wallet_address: &str,
    ) -> Result<UserDetails, ServiceError> {
        let user = self
            .store
            .get_user(None, Some(wallet_address), None)
            .await?
            .ok_or_else(|| ServiceError::WalletNotFound(wallet_address.to_string()))?;
        self.details(user).await
    }

    async fn details(&self, user: User) -> Result<UserDetails, ServiceError> {
        let mut user = self.ensure_referral_code(user).await?;

        let referrals = self.store.get_referrals_by_ids(&user.referral_ids).await?;
        let total_commission: i64 = referrals.iter().map(|r| r.base_amount).sum();
        let total_earned: i64 = referrals.iter().map(|r| r.earned_balance).sum();

        if total_commission != user.total_commission {
            user = self
                .store
                .update_user_total_commission(user.id, total_commission)
                .await?;
        }

        let referral_link = match &user.referral_code {
            Some(code) => generate_referral_link(&self.app_url, code),
            None => String::new(),
        };

        Ok(UserDetails {
            user,
            referral_link,
            total_earned,
        })
    }

    /// Gives the user a referral code if they have none yet, retrying on the
    /// rare collision.
    async fn ensure_referral_code(&self, user: User) -> Result<User, ServiceError> {
        if user.referral_code.is_some() {
            return Ok(user);
        }

        let mut last_conflict = None;
        for _ in 0..CODE_ATTEMPTS {
            match self
                .store
                .update_user_referral_code(user.id, generate_referral_code())
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(StoreError::Conflict(what)) => {
                    tracing::debug!("Referral code collision for user {}", user.id);
                    last_conflict = Some(what);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ServiceError::Store(StoreError::Conflict(
            last_conflict.unwrap_or_else(|| "referral code".to_string()),
        )))
    }
}
