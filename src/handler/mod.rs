pub mod referral;
pub mod users;
