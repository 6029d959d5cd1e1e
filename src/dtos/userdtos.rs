// dtos/userdtos.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    models::{referralmodel::ReferralEdge, usermodel::User},
    utils::currency::from_cents,
};

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserDto {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,

    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,

    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Email is invalid")
    )]
    pub email: String,

    #[validate(length(min = 1, message = "Wallet address is required"))]
    pub wallet_address: String,
}

/// KYC registration; a referral code links the new user under its owner.
#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserDto {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,

    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,

    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Email is invalid")
    )]
    pub email: String,

    #[validate(length(min = 1, message = "Wallet address is required"))]
    pub wallet_address: String,

    #[validate(length(min = 1, message = "Referral code cannot be empty"))]
    pub referral_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterUserDto {
    pub id: String,
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub wallet_address: String,
    pub referral_code: Option<String>,
    pub referral_link: Option<String>,
    pub referrals: Vec<Uuid>,
    pub total_commission: f64,
    pub total_earned: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FilterUserDto {
    pub fn filter_user(user: &User) -> Self {
        FilterUserDto {
            id: user.id.to_string(),
            full_name: user.full_name.to_owned(),
            username: user.username.to_owned(),
            email: user.email.to_owned(),
            wallet_address: user.wallet_address.to_owned(),
            referral_code: user.referral_code.clone(),
            referral_link: None,
            referrals: user.referral_ids.clone(),
            total_commission: from_cents(user.total_commission),
            total_earned: 0.0,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserData {
    pub user: FilterUserDto,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponseDto {
    pub status: String,
    pub data: UserData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserResponseDto {
    pub status: String,
    pub message: String,
    pub user: FilterUserDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral: Option<ReferralEdge>,
}

#[derive(Serialize)]
pub struct Response {
    pub status: &'static str,
    pub message: String,
}
