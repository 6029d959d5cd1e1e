pub mod commission;
pub mod error;
pub mod graph;
pub mod referral;
pub mod referral_service;
pub mod user_service;
