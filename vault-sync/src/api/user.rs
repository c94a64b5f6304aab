//! Sign-in, account info, sign-out.

use axum::extract::{Json, State};
use serde::Deserialize;
use serde_json::json;
use vault_sync_core::{crypto, repo, Error};

use super::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

pub async fn signin(State(state): State<AppState>, Json(req): Json<SigninRequest>) -> ApiResult {
    let user = repo::users::get_by_email(&state.pool, &req.email)
        .await?
        .ok_or(Error::AuthDenied)?;

    if !crypto::verify_password(&req.password, &user.salt, &user.password) {
        return Err(Error::AuthDenied.into());
    }

    let token = repo::users::create_token(&state.pool, user.id).await?;

    Ok(Json(json!({
        "email": user.email,
        "license": "",
        "name": user.name,
        "token": token,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

pub async fn info(State(state): State<AppState>, Json(req): Json<TokenRequest>) -> ApiResult {
    repo::users::require_token(&state.pool, &req.token).await?;
    let user = repo::users::get_by_token(&state.pool, &req.token)
        .await?
        .ok_or(Error::AuthDenied)?;

    Ok(Json(json!({
        "email": user.email,
        "mfa": false,
        "credit": 0,
        "discount": null,
        "license": "",
        "name": user.name,
        "payment": "",
        "uid": user.id.to_string(),
    })))
}

pub async fn signout(State(state): State<AppState>, Json(req): Json<TokenRequest>) -> ApiResult {
    // invalid tokens are simply ignored
    repo::users::delete_token(&state.pool, &req.token).await?;
    Ok(Json(json!({})))
}
