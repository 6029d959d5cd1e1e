// handler/referral.rs
use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post, put},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{referraldtos::*, userdtos::Response},
    error::HttpError,
    AppState,
};

pub fn referral_handler() -> Router {
    Router::new()
        .route("/", get(get_all_referrals).post(create_referral))
        .route("/check", post(check_referral_code))
        .route("/wallet", post(create_referral_by_wallet))
        .route("/wallet/:wallet_address", get(get_referrals_by_wallet))
        .route("/user/:user_id", get(get_referrals_by_user))
        .route("/update-by-wallet", patch(update_referral_by_wallet))
        .route("/tree/update", patch(update_referral_tree))
        .route("/tree/user/:user_id", get(get_referral_tree_by_user))
        .route("/tree/:wallet_address", get(get_referral_tree_by_wallet))
        .route(
            "/:id",
            put(update_referral)
                .patch(partial_update_referral)
                .delete(delete_referral),
        )
}

pub async fn check_referral_code(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<CheckReferralCodeDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let referrer = app_state
        .referral_service
        .check_referral_code(&body.referral_code, body.wallet_address.as_deref())
        .await?;

    Ok(Json(CheckReferralCodeResponseDto {
        status: "success".to_string(),
        message: "Referral code is valid.".to_string(),
        referrer,
    }))
}

pub async fn create_referral(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<CreateReferralDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let referral = app_state
        .referral_service
        .create_referral(body.referrer, body.referee, &body.referral_code)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ReferralResponseDto {
            status: "success".to_string(),
            message: "Referral created.".to_string(),
            referral,
            distribution: None,
        }),
    ))
}

pub async fn create_referral_by_wallet(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<CreateReferralByWalletDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let referral = app_state
        .referral_service
        .create_referral_by_wallet(&body.referral_code, &body.wallet_address)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ReferralResponseDto {
            status: "success".to_string(),
            message: "Referral created.".to_string(),
            referral,
            distribution: None,
        }),
    ))
}

pub async fn get_all_referrals(
    Extension(app_state): Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, HttpError> {
    let listing = app_state.referral_service.list_referrals().await?;

    Ok(Json(ReferralListResponseDto {
        status: "success".to_string(),
        referrals: listing.referrals,
        total_referrals: listing.total_referrals,
        growth: listing.growth,
    }))
}

pub async fn get_referrals_by_user(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let referrals = app_state.referral_service.referrals_by_user(user_id).await?;

    Ok(Json(UserReferralsResponseDto {
        status: "success".to_string(),
        referral_code: None,
        referrals,
    }))
}

pub async fn get_referrals_by_wallet(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(wallet_address): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let (user, referrals) = app_state
        .referral_service
        .referrals_by_wallet(&wallet_address)
        .await?;

    Ok(Json(UserReferralsResponseDto {
        status: "success".to_string(),
        referral_code: user.referral_code,
        referrals,
    }))
}

pub async fn get_referral_tree_by_user(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let referral_tree = app_state.referral_service.tree_for_user(user_id).await?;

    Ok(Json(ReferralTreeResponseDto {
        status: "success".to_string(),
        referral_tree,
    }))
}

pub async fn get_referral_tree_by_wallet(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(wallet_address): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let referral_tree = app_state
        .referral_service
        .tree_for_wallet(&wallet_address)
        .await?;

    Ok(Json(ReferralTreeResponseDto {
        status: "success".to_string(),
        referral_tree,
    }))
}

pub async fn update_referral_by_wallet(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<DistributeByWalletDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let distribution = app_state
        .referral_service
        .distribute_by_wallet(&body.wallet_address, body.investment_amount)
        .await?;

    Ok(Json(DistributionResponseDto {
        status: "success".to_string(),
        message: "Commissions distributed successfully.".to_string(),
        distribution,
    }))
}

pub async fn update_referral_tree(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<ReparentReferralDto>,
) -> Result<impl IntoResponse, HttpError> {
    let referral = app_state
        .referral_service
        .reparent(body.referral_id, body.new_parent_referral_id)
        .await?;

    Ok(Json(ReferralResponseDto {
        status: "success".to_string(),
        message: "Referral tree updated.".to_string(),
        referral,
        distribution: None,
    }))
}

// Bodies are parsed by hand so unknown or mistyped fields come back as a 400
pub async fn update_referral(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, HttpError> {
    let body: UpdateReferralDto = serde_json::from_value(body)
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    apply_update(&app_state, id, body.into()).await
}

pub async fn partial_update_referral(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, HttpError> {
    let update: ReferralUpdate = serde_json::from_value(body)
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    apply_update(&app_state, id, update).await
}

async fn apply_update(
    app_state: &AppState,
    id: Uuid,
    update: ReferralUpdate,
) -> Result<Json<ReferralResponseDto>, HttpError> {
    let outcome = app_state.referral_service.update_referral(id, update).await?;

    Ok(Json(ReferralResponseDto {
        status: "success".to_string(),
        message: "Referral updated successfully.".to_string(),
        referral: outcome.referral,
        distribution: outcome.distribution,
    }))
}

pub async fn delete_referral(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    app_state.referral_service.delete_referral(id).await?;

    Ok(Json(Response {
        status: "success",
        message: "Referral deleted.".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{
        config::Config,
        db::{memory::MemoryStore, userdb::UserExt},
        models::usermodel::{NewUser, User},
        routes::create_router,
        AppState,
    };

    use super::*;

    struct TestApp {
        store: Arc<MemoryStore>,
        router: Router,
    }

    impl TestApp {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let app_state = Arc::new(AppState::new(store.clone(), Config::for_tests()));
            TestApp { store, router: create_router(app_state) }
        }

        async fn user(&self, name: &str) -> User {
            self.store
                .save_user(NewUser {
                    full_name: name.to_string(),
                    username: name.to_lowercase(),
                    email: format!("{}@example.com", name.to_lowercase()),
                    wallet_address: format!("0x{}", name.to_lowercase()),
                    referral_code: Some(format!("{}CODE", name.to_uppercase())),
                })
                .await
                .unwrap()
        }

        async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let mut request = Request::builder().method(method).uri(uri);
            let body = match body {
                Some(body) => {
                    request = request.header("content-type", "application/json");
                    Body::from(body.to_string())
                }
                None => Body::empty(),
            };

            let response = self
                .router
                .clone()
                .oneshot(request.body(body).unwrap())
                .await
                .unwrap();

            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, json)
        }

        async fn refer(&self, code: &str, wallet: &str) -> Value {
            let (status, body) = self
                .send(
                    Method::POST,
                    "/api/referral/wallet",
                    Some(json!({ "referralCode": code, "walletAddress": wallet })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            body["referral"].clone()
        }
    }

    #[tokio::test]
    async fn check_returns_the_referrer_or_404() {
        let app = TestApp::new();
        let owner = app.user("Owner").await;

        let (status, body) = app
            .send(Method::POST, "/api/referral/check", Some(json!({ "referralCode": "OWNERCODE" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["referrer"]["id"], owner.id.to_string());

        let (status, body) = app
            .send(Method::POST, "/api/referral/check", Some(json!({ "referralCode": "MISSING" })))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "fail");
        assert_eq!(body["message"], "Referral code not found.");

        let (status, _) = app
            .send(Method::POST, "/api/referral/check", Some(json!({ "referralCode": "" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn duplicate_and_self_referrals_are_rejected() {
        let app = TestApp::new();
        let a = app.user("A").await;
        let b = app.user("B").await;
        app.refer("ACODE", "0xb").await;

        let (status, body) = app
            .send(
                Method::POST,
                "/api/referral",
                Some(json!({ "referrer": app.user("D").await.id, "referee": b.id, "referralCode": "DCODE" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "Referee has already been referred.");

        let (status, _) = app
            .send(
                Method::POST,
                "/api/referral",
                Some(json!({ "referrer": a.id, "referee": a.id, "referralCode": "ACODE" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn completing_via_patch_distributes_once() {
        let app = TestApp::new();
        app.user("Root").await;
        app.user("Mid").await;
        app.user("Leaf").await;
        let upper = app.refer("ROOTCODE", "0xmid").await;
        let lower = app.refer("MIDCODE", "0xleaf").await;
        let uri = format!("/api/referral/{}", lower["id"].as_str().unwrap());

        let (status, body) = app
            .send(Method::PATCH, &uri, Some(json!({ "status": "Completed", "commission": 1000 })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["referral"]["status"], "Completed");
        assert_eq!(body["distribution"]["credits"].as_array().unwrap().len(), 2);

        let (status, body) = app
            .send(Method::PUT, &uri, Some(json!({ "status": "Completed" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("distribution").is_none());

        let (_, listing) = app.send(Method::GET, "/api/referral", None).await;
        let upper_id = upper["id"].as_str().unwrap();
        let upper = listing["referrals"]
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["id"] == upper_id)
            .unwrap();
        assert_eq!(upper["earnedBalance"], 10.0);
        assert_eq!(upper["status"], "Pending");
    }

    #[tokio::test]
    async fn patch_rejects_unknown_or_empty_bodies() {
        let app = TestApp::new();
        app.user("A").await;
        app.user("B").await;
        let referral = app.refer("ACODE", "0xb").await;
        let uri = format!("/api/referral/{}", referral["id"].as_str().unwrap());

        let (status, _) = app.send(Method::PATCH, &uri, Some(json!({ "level": 7 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app.send(Method::PATCH, &uri, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No fields provided for update.");

        let (status, body) = app
            .send(Method::PATCH, &uri, Some(json!({ "commission": -5 })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Commission cannot be negative.");

        let (status, _) = app.send(Method::PUT, &uri, Some(json!({ "commission": 5 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn tree_routes_resolve_by_wallet_and_user() {
        let app = TestApp::new();
        let root = app.user("Root").await;
        let child = app.user("Child").await;
        app.user("Grandchild").await;
        app.refer("ROOTCODE", "0xchild").await;
        app.refer("CHILDCODE", "0xgrandchild").await;

        let (status, body) = app.send(Method::GET, "/api/referral/tree/0xroot", None).await;
        assert_eq!(status, StatusCode::OK);
        let tree = &body["referralTree"];
        assert_eq!(tree["user"]["id"], root.id.to_string());
        assert_eq!(tree["descendants"][0]["fullName"], "Child");
        assert_eq!(tree["descendants"][0]["referrals"][0]["fullName"], "Grandchild");
        assert_eq!(tree["descendants"][0]["referrals"][0]["level"], 2);

        let (status, body) = app
            .send(Method::GET, &format!("/api/referral/tree/user/{}", child.id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["referralTree"]["ancestors"][0]["fullName"], "Root");

        let (status, body) = app.send(Method::GET, "/api/referral/tree/0xnobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "User not found.");
    }

    #[tokio::test]
    async fn reparent_and_delete_round_trip() {
        let app = TestApp::new();
        app.user("R1").await;
        app.user("R2").await;
        app.user("X").await;
        app.user("A").await;
        let r2x = app.refer("R2CODE", "0xx").await;
        let r1a = app.refer("R1CODE", "0xa").await;

        let (status, body) = app
            .send(
                Method::PATCH,
                "/api/referral/tree/update",
                Some(json!({ "referralId": r1a["id"], "newParentReferralId": r2x["id"] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["referral"]["level"], 2);
        assert_eq!(body["referral"]["ancestors"][0], r2x["id"]);

        let uri = format!("/api/referral/{}", r1a["id"].as_str().unwrap());
        let (status, body) = app.send(Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Referral deleted.");

        let (status, _) = app.send(Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wallet_distribution_and_listings() {
        let app = TestApp::new();
        let a = app.user("A").await;
        app.user("B").await;
        app.refer("ACODE", "0xb").await;

        let (status, body) = app
            .send(
                Method::PATCH,
                "/api/referral/update-by-wallet",
                Some(json!({ "walletAddress": "0xb", "investmentAmount": 500 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["distribution"]["credits"][0]["amount"], 50.0);
        assert_eq!(body["distribution"]["stop"]["reason"], "reachedRoot");

        let (status, _) = app
            .send(
                Method::PATCH,
                "/api/referral/update-by-wallet",
                Some(json!({ "walletAddress": "0xb", "investmentAmount": 0 })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = app.send(Method::GET, "/api/referral", None).await;
        assert_eq!(body["totalReferrals"], 1);
        assert_eq!(body["growth"], "100.00");
        assert_eq!(body["referrals"][0]["referee"]["fullName"], "B");

        let (_, body) = app.send(Method::GET, &format!("/api/referral/user/{}", a.id), None).await;
        assert_eq!(body["referrals"].as_array().unwrap().len(), 1);

        let (_, body) = app.send(Method::GET, "/api/referral/wallet/0xa", None).await;
        assert_eq!(body["referralCode"], "ACODE");

        let (status, body) = app.send(Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store"], "memory");
        assert_eq!(body["distribution"]["runs"], 1);
    }
}
