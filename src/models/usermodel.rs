use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::currency::cents_as_amount;

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub wallet_address: String,

    pub referral_code: Option<String>,

    /// Back-references to the referral edges where this user is the referrer.
    pub referral_ids: Vec<Uuid>,

    /// Cached sum of the base amounts across `referral_ids` in cents,
    /// refreshed on read.
    #[serde(with = "cents_as_amount")]
    pub total_commission: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            full_name: self.full_name.clone(),
            email: self.email.clone(),
        }
    }
}

/// The `{id, fullName, email}` projection embedded in referral responses.
#[derive(Debug, Deserialize, Serialize, sqlx::FromRow, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub wallet_address: String,
    pub referral_code: Option<String>,
}
