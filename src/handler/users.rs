// handler/users.rs
use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::userdtos::*,
    error::HttpError,
    service::user_service::UserDetails,
    utils::currency::from_cents,
    AppState,
};

pub fn users_handler() -> Router {
    Router::new()
        .route("/", post(create_user))
        .route("/register", post(register_user))
        .route("/wallet/:wallet_address", get(get_user_by_wallet))
        .route("/:id", get(get_user))
}

fn details_response(details: UserDetails) -> UserResponseDto {
    let mut filtered_user = FilterUserDto::filter_user(&details.user);
    filtered_user.referral_link = Some(details.referral_link);
    filtered_user.total_earned = from_cents(details.total_earned);

    UserResponseDto {
        status: "success".to_string(),
        data: UserData {
            user: filtered_user,
        },
    }
}

pub async fn create_user(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<CreateUserDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let user = app_state.user_service.create_user(body).await?;

    let response = UserResponseDto {
        status: "success".to_string(),
        data: UserData {
            user: FilterUserDto::filter_user(&user),
        },
    };

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn register_user(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<RegisterUserDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let (user, referral) = app_state.user_service.register(body).await?;

    let message = match &referral {
        Some(_) => "Registration successful. Referral recorded.",
        None => "Registration successful.",
    };

    Ok((
        StatusCode::CREATED,
        Json(RegisterUserResponseDto {
            status: "success".to_string(),
            message: message.to_string(),
            user: FilterUserDto::filter_user(&user),
            referral,
        }),
    ))
}

pub async fn get_user(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let details = app_state.user_service.get_user_details(id).await?;
    Ok(Json(details_response(details)))
}

pub async fn get_user_by_wallet(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(wallet_address): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let details = app_state
        .user_service
        .get_user_details_by_wallet(&wallet_address)
        .await?;
    Ok(Json(details_response(details)))
}
