use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{models::usermodel::UserProfile, utils::currency::cents_as_amount};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Default)]
#[sqlx(type_name = "referral_status", rename_all = "snake_case")]
pub enum ReferralStatus {
    #[default]
    Initiated,
    Pending,
    Completed,
}

impl ReferralStatus {
    pub fn to_str(&self) -> &str {
        match self {
            ReferralStatus::Initiated => "initiated",
            ReferralStatus::Pending => "pending",
            ReferralStatus::Completed => "completed",
        }
    }
}

/// One referrer -> referee relationship.
///
/// `ancestors` lists the edges above this one, oldest first, and always has
/// `level - 1` entries. A referee owns at most one edge.
#[derive(Debug, Deserialize, Serialize, sqlx::FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReferralEdge {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub referee_id: Uuid,
    pub referral_code: String,
    pub level: i32,
    pub ancestors: Vec<Uuid>,
    /// Settled commission on this edge in cents; funds distribution up the
    /// chain once the edge completes.
    #[serde(with = "cents_as_amount")]
    pub base_amount: i64,
    /// Running total credited to the referrer by distributions, in cents.
    #[serde(with = "cents_as_amount")]
    pub earned_balance: i64,
    pub status: ReferralStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReferral {
    pub referrer_id: Uuid,
    pub referee_id: Uuid,
    pub referral_code: String,
    pub level: i32,
    pub ancestors: Vec<Uuid>,
}

/// Position of an edge in the tree; the only fields a re-parent rewrites.
#[derive(Debug, Clone, PartialEq)]
pub struct LineageUpdate {
    pub referral_id: Uuid,
    pub referrer_id: Uuid,
    pub level: i32,
    pub ancestors: Vec<Uuid>,
}

/// An edge with its referrer and referee resolved to profiles.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedReferral {
    #[serde(flatten)]
    pub referral: ReferralEdge,
    pub referrer: Option<UserProfile>,
    pub referee: Option<UserProfile>,
}

/// A node of the downward referral tree.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DescendantNode {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub level: i32,
    #[serde(with = "cents_as_amount")]
    pub commission: i64,
    pub referrals: Vec<DescendantNode>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReferralTree {
    pub user: UserProfile,
    pub ancestors: Vec<UserProfile>,
    pub descendants: Vec<DescendantNode>,
}
