use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::instrument;

use crate::{
    auth::extractors::{AdminUser, JsonBody},
    error::{Error, Result},
    response::{ApiResponse, PageMeta},
    state::AppState,
    users::model::{UpdateUserRequest, UserId, UserView},
};

const DEFAULT_LIMIT: u64 = 10;
const MAX_LIMIT: u64 = 100;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/search", get(search_users))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PageQuery {
    /// `(page, limit)` after defaults and bounds checks.
    fn resolve(&self) -> Result<(u64, u64)> {
        let page = self.page.unwrap_or(1);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if page == 0 {
            return Err(Error::validation("page", "must be at least 1"));
        }
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(Error::validation("limit", "must be between 1 and 100"));
        }
        Ok((page, limit))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[instrument(skip(state, _admin))]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<PageQuery>,
) -> Result<ApiResponse<Vec<UserView>>> {
    let (page, limit) = query.resolve()?;
    let result = state.users.list_users((page - 1) * limit, limit).await?;
    Ok(ApiResponse::paged(
        result.items,
        PageMeta::new(result.total, page, limit),
    ))
}

#[instrument(skip(state, _admin))]
pub async fn search_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<SearchQuery>,
) -> Result<ApiResponse<Vec<UserView>>> {
    let (page, limit) = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .resolve()?;
    let result = state
        .users
        .search_users(&query.q, (page - 1) * limit, limit)
        .await?;
    Ok(ApiResponse::paged(
        result.items,
        PageMeta::new(result.total, page, limit),
    ))
}

#[instrument(skip(state, _admin))]
pub async fn get_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<UserId>,
) -> Result<ApiResponse<UserView>> {
    Ok(ApiResponse::ok(state.users.get_user(id).await?))
}

#[instrument(skip(state, _admin, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<UserId>,
    JsonBody(payload): JsonBody<UpdateUserRequest>,
) -> Result<ApiResponse<UserView>> {
    Ok(ApiResponse::ok(state.users.update_user(id, payload).await?))
}

#[instrument(skip(state, admin))]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<UserId>,
) -> Result<StatusCode> {
    if admin.user_id == id {
        return Err(Error::validation("id", "cannot delete your own account"));
    }
    state.users.delete_user(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
