use thiserror::Error;
use uuid::Uuid;
use crate::{
    db::StoreError,
    error::{ErrorMessage, HttpError},
};
use axum::http::StatusCode;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("User {0} not found")]
    UserNotFound(Uuid),

    #[error("No user with wallet address {0}")]
    WalletNotFound(String),

    #[error("Referral {0} not found")]
    ReferralNotFound(Uuid),

    #[error("Parent referral {0} not found")]
    ParentReferralNotFound(Uuid),

    #[error("Referral code {0} not found")]
    ReferralCodeNotFound(String),

    #[error("No referee with wallet address {0}")]
    RefereeNotFound(String),

    #[error("No referrer with referral code {0}")]
    ReferrerNotFound(String),

    #[error("User {0} has already been referred")]
    AlreadyReferred(Uuid),

    #[error("User {0} cannot refer themselves")]
    SelfReferral(Uuid),

    #[error("Referring {referee} under {referrer} would create a cycle")]
    ReferralCycle { referrer: Uuid, referee: Uuid },

    #[error("Wallet address {0} is already registered")]
    WalletTaken(String),

    #[error("Commission {0} is negative")]
    NegativeCommission(f64),

    #[error("Update carries no fields")]
    EmptyUpdate,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        let status = error.status_code();

        let message = match &error {
            ServiceError::UserNotFound(_) | ServiceError::WalletNotFound(_) => {
                ErrorMessage::UserNotFound.to_string()
            }
            ServiceError::ReferralNotFound(_) => ErrorMessage::ReferralNotFound.to_string(),
            ServiceError::ParentReferralNotFound(_) => {
                ErrorMessage::ParentReferralNotFound.to_string()
            }
            ServiceError::ReferralCodeNotFound(_) => ErrorMessage::ReferralCodeNotFound.to_string(),
            ServiceError::RefereeNotFound(_) => ErrorMessage::RefereeNotFound.to_string(),
            ServiceError::ReferrerNotFound(_) => ErrorMessage::ReferrerNotFound.to_string(),
            ServiceError::NegativeCommission(_) => ErrorMessage::NegativeCommission.to_string(),
            ServiceError::EmptyUpdate => ErrorMessage::EmptyBody.to_string(),
            ServiceError::AlreadyReferred(_) => ErrorMessage::RefereeAlreadyReferred.to_string(),
            ServiceError::WalletTaken(_) => ErrorMessage::WalletAlreadyRegistered.to_string(),
            ServiceError::SelfReferral(_) => ErrorMessage::SelfReferral.to_string(),
            ServiceError::ReferralCycle { .. } => ErrorMessage::ReferralCycle.to_string(),
            ServiceError::Validation(message) => message.clone(),
            ServiceError::Store(StoreError::NotFound(what)) => format!("{} not found.", what),
            ServiceError::Store(StoreError::Conflict(what)) => format!("Duplicate {}.", what),
            ServiceError::Store(StoreError::Database(err)) => {
                tracing::error!("Storage failure: {}", err);
                ErrorMessage::ServerError.to_string()
            }
        };

        HttpError::new(message, status)
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::UserNotFound(_)
            | ServiceError::WalletNotFound(_)
            | ServiceError::ReferralNotFound(_)
            | ServiceError::ParentReferralNotFound(_)
            | ServiceError::ReferralCodeNotFound(_)
            | ServiceError::RefereeNotFound(_)
            | ServiceError::ReferrerNotFound(_)
            | ServiceError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,

            ServiceError::AlreadyReferred(_)
            | ServiceError::WalletTaken(_)
            | ServiceError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,

            ServiceError::SelfReferral(_)
            | ServiceError::ReferralCycle { .. }
            | ServiceError::NegativeCommission(_)
            | ServiceError::EmptyUpdate
            | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,

            ServiceError::Store(StoreError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
