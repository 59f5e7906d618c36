use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tracing::instrument;

use crate::{
    auth::{
        claims::Identity,
        extractors::{BearerToken, JsonBody},
    },
    error::Result,
    response::ApiResponse,
    state::AppState,
    users::model::{AuthResponse, LoginRequest, RegisterRequest, UpdateProfileRequest, UserView},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/profile", get(get_profile).put(update_profile))
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, ApiResponse<UserView>)> {
    let user = state.users.register(payload).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(user)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<ApiResponse<AuthResponse>> {
    Ok(ApiResponse::ok(state.users.login(payload).await?))
}

#[instrument(skip(state, token))]
pub async fn refresh(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<ApiResponse<TokenResponse>> {
    let token = state.users.refresh(&token)?;
    Ok(ApiResponse::ok(TokenResponse { token }))
}

#[instrument(skip(state, identity), fields(user_id = identity.user_id))]
pub async fn get_profile(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<ApiResponse<UserView>> {
    Ok(ApiResponse::ok(state.users.get_profile(&identity).await?))
}

#[instrument(skip(state, identity, payload), fields(user_id = identity.user_id))]
pub async fn update_profile(
    State(state): State<AppState>,
    identity: Identity,
    JsonBody(payload): JsonBody<UpdateProfileRequest>,
) -> Result<ApiResponse<UserView>> {
    Ok(ApiResponse::ok(
        state.users.update_profile(&identity, payload).await?,
    ))
}
