pub mod referraldtos;
pub mod userdtos;
