use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_json::to_string(&self).map_err(|_| fmt::Error)?)
    }
}

#[derive(Debug, PartialEq)]
pub enum ErrorMessage {
    ServerError,
    EmptyBody,
    UserNotFound,
    RefereeNotFound,
    ReferrerNotFound,
    ReferralNotFound,
    ParentReferralNotFound,
    ReferralCodeNotFound,
    RefereeAlreadyReferred,
    SelfReferral,
    ReferralCycle,
    NegativeCommission,
    WalletAlreadyRegistered,
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

impl ErrorMessage {
    fn to_str(&self) -> &'static str {
        match self {
            ErrorMessage::ServerError => "Internal server error",
            ErrorMessage::EmptyBody => "No fields provided for update.",
            ErrorMessage::UserNotFound => "User not found.",
            ErrorMessage::RefereeNotFound => "Referee not found.",
            ErrorMessage::ReferrerNotFound => "Referrer not found.",
            ErrorMessage::ReferralNotFound => "Referral not found.",
            ErrorMessage::ParentReferralNotFound => "New parent referral not found.",
            ErrorMessage::ReferralCodeNotFound => "Referral code not found.",
            ErrorMessage::RefereeAlreadyReferred => "Referee has already been referred.",
            ErrorMessage::SelfReferral => "Referrer and referee cannot be the same user.",
            ErrorMessage::ReferralCycle => "Referral would create a cycle in the referral tree.",
            ErrorMessage::NegativeCommission => "Commission cannot be negative.",
            ErrorMessage::WalletAlreadyRegistered => "User with this wallet address already exists.",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpError {
    pub message: String,
    pub status: StatusCode,
}

impl HttpError {
    pub fn new(message: impl Into<String>, status: StatusCode) -> Self {
        HttpError {
            message: message.into(),
            status,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        HttpError {
            message: message.into(),
            status: StatusCode::BAD_REQUEST,
        }
    }

    pub fn into_http_response(self) -> Response {
        let status = if self.status.is_server_error() { "error" } else { "fail" };
        let json_response = Json(ErrorResponse {
            status: status.to_string(),
            message: self.message.clone(),
        });

        (self.status, json_response).into_response()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HttpError: message: {}, status: {}",
            self.message, self.status
        )
    }
}

impl std::error::Error for HttpError {}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        self.into_http_response()
    }
}
