// dtos/referraldtos.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    models::{
        referralmodel::{PopulatedReferral, ReferralEdge, ReferralStatus, ReferralTree},
        usermodel::User,
    },
    service::commission::DistributionReport,
};

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReferralCodeDto {
    #[validate(length(min = 1, message = "Referral code is required."))]
    pub referral_code: String,

    /// Wallet of the user about to redeem the code, if known.
    pub wallet_address: Option<String>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReferralDto {
    pub referrer: Uuid,
    pub referee: Uuid,

    #[validate(length(min = 1, message = "Referral code is required."))]
    pub referral_code: String,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReferralByWalletDto {
    #[validate(length(min = 1, message = "Referral code is required."))]
    pub referral_code: String,

    #[validate(length(min = 1, message = "Wallet address is required."))]
    pub wallet_address: String,
}

/// Full update (`PUT`): status is mandatory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateReferralDto {
    pub status: ReferralStatus,
    pub commission: Option<f64>,
}

/// The only fields a referral update may touch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReferralUpdate {
    pub status: Option<ReferralStatus>,
    /// New base amount for the edge.
    pub commission: Option<f64>,
}

impl ReferralUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.commission.is_none()
    }
}

impl From<UpdateReferralDto> for ReferralUpdate {
    fn from(dto: UpdateReferralDto) -> Self {
        ReferralUpdate {
            status: Some(dto.status),
            commission: dto.commission,
        }
    }
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeByWalletDto {
    #[validate(length(min = 1, message = "Wallet address is required."))]
    pub wallet_address: String,

    #[validate(range(min = 0.01, message = "Investment amount must be positive."))]
    pub investment_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReparentReferralDto {
    pub referral_id: Uuid,
    pub new_parent_referral_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReferralCodeResponseDto {
    pub status: String,
    pub message: String,
    pub referrer: User,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralResponseDto {
    pub status: String,
    pub message: String,
    pub referral: ReferralEdge,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<DistributionReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralListResponseDto {
    pub status: String,
    pub referrals: Vec<PopulatedReferral>,
    pub total_referrals: usize,
    /// Share of referrals created in the last seven days, in percent.
    pub growth: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReferralsResponseDto {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
    pub referrals: Vec<PopulatedReferral>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralTreeResponseDto {
    pub status: String,
    pub referral_tree: ReferralTree,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionResponseDto {
    pub status: String,
    pub message: String,
    pub distribution: DistributionReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referral_update_rejects_unknown_fields() {
        let err = serde_json::from_str::<ReferralUpdate>(r#"{"level": 3}"#);
        assert!(err.is_err());

        let err = serde_json::from_str::<ReferralUpdate>(r#"{"status": "Pending", "ancestors": []}"#);
        assert!(err.is_err());
    }

    #[test]
    fn referral_update_reads_status_and_commission() {
        let update: ReferralUpdate =
            serde_json::from_str(r#"{"status": "Completed", "commission": 250.5}"#).unwrap();
        assert_eq!(update.status, Some(ReferralStatus::Completed));
        assert_eq!(update.commission, Some(250.5));

        let empty: ReferralUpdate = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn full_update_requires_status() {
        assert!(serde_json::from_str::<UpdateReferralDto>(r#"{"commission": 10}"#).is_err());

        let dto: UpdateReferralDto = serde_json::from_str(r#"{"status": "Pending"}"#).unwrap();
        let update = ReferralUpdate::from(dto);
        assert_eq!(update.status, Some(ReferralStatus::Pending));
        assert_eq!(update.commission, None);
    }

    #[test]
    fn distribution_request_needs_a_positive_amount() {
        let dto = DistributeByWalletDto {
            wallet_address: "0xabc".to_string(),
            investment_amount: 0.0,
        };
        assert!(dto.validate().is_err());

        let dto = DistributeByWalletDto {
            wallet_address: "0xabc".to_string(),
            investment_amount: 250.0,
        };
        assert!(dto.validate().is_ok());
    }
}
