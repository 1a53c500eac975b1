//! Account bootstrap endpoints.

use crate::{
    errors::AppError,
    handlers::Owner,
    models::user::{Account, User},
    state::AppState,
};
use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateAccountReq {
    pub username: String,
}

/// `POST /users`: create a user together with their root directory.
pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountReq>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let account = state.accounts.create_account(&req.username).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// `GET /me`
pub async fn me(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<User>, AppError> {
    state
        .accounts
        .get(owner)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::unauthorized("Unauthorized"))
}
