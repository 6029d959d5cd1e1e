pub mod db;
pub mod memory;
pub mod referraldb;
pub mod userdb;

use thiserror::Error;

use crate::db::{referraldb::ReferralExt, userdb::UserExt};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl StoreError {
    /// Classifies a driver error for the record named by `what`.
    pub fn from_sqlx(err: sqlx::Error, what: &str) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(what.to_string()),
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(what.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

/// The document store the referral core runs against.
pub trait Store: UserExt + ReferralExt + std::fmt::Debug {
    fn backend(&self) -> &'static str;
}
