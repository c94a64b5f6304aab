//! Vault CRUD and sharing.
//!
//! These endpoints only produce the rows the sync engine reads; they
//! never talk to live connections. Deleting a vault is a soft delete
//! and the purger does the rest later.

use axum::extract::{Json, State};
use axum::http::header::HOST;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Value};
use vault_sync_core::model::Vault;
use vault_sync_core::{crypto, repo, Error};

use super::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

fn vault_item(vault: &Vault, host: &str) -> Value {
    json!({
        "id": vault.id,
        "name": vault.name,
        "created": vault.created_at.timestamp_millis(),
        "password": vault.password,
        "salt": vault.salt,
        "host": host,
    })
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TokenRequest>,
) -> ApiResult {
    let token = repo::users::require_token(&state.pool, &req.token).await?;
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let host = format!("{host}/sync");

    let vaults: Vec<Value> = repo::vaults::list_owned(&state.pool, token.user_id)
        .await?
        .iter()
        .map(|vault| vault_item(vault, &host))
        .collect();
    let shared: Vec<Value> = repo::vaults::list_shared(&state.pool, token.user_id)
        .await?
        .iter()
        .map(|vault| vault_item(vault, &host))
        .collect();

    Ok(Json(json!({"vaults": vaults, "shared": shared})))
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub name: String,
    pub keyhash: Option<String>,
    pub salt: Option<String>,
    pub token: String,
}

pub async fn create(State(state): State<AppState>, Json(req): Json<CreateRequest>) -> ApiResult {
    let token = repo::users::require_token(&state.pool, &req.token).await?;

    // no keyhash from the client: the server picks the vault password
    let (password, salt, keyhash) = match req.keyhash {
        Some(keyhash) => (String::new(), req.salt.unwrap_or_default(), keyhash),
        None => {
            let password = crypto::generate_secret();
            let salt = crypto::generate_secret();
            let keyhash = crypto::keyhash(&password, &salt);
            (password, salt, keyhash)
        }
    };

    repo::vaults::create(
        &state.pool,
        token.user_id,
        &req.name,
        &password,
        &keyhash,
        &salt,
    )
    .await?;

    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub vault_uid: i64,
    pub token: String,
}

pub async fn delete(State(state): State<AppState>, Json(req): Json<DeleteRequest>) -> ApiResult {
    let token = repo::users::require_token(&state.pool, &req.token).await?;

    // owner only; a missing vault is not an error here
    if let Some(vault) =
        repo::vaults::get(&state.pool, req.vault_uid, Some(token.user_id), false).await?
    {
        repo::vaults::soft_delete(&state.pool, vault.id).await?;
    }

    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct AccessRequest {
    pub token: String,
    pub vault_uid: i64,
    pub keyhash: String,
}

pub async fn access(State(state): State<AppState>, Json(req): Json<AccessRequest>) -> ApiResult {
    let token = repo::users::require_token(&state.pool, &req.token).await?;

    let vault = repo::vaults::get(&state.pool, req.vault_uid, Some(token.user_id), true)
        .await?
        .ok_or(Error::VaultNotFound)?;

    if !crypto::constant_time_eq(&vault.key_hash, &req.keyhash) {
        return Ok(Json(json!({"error": "Invalid password"})));
    }

    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct ShareListRequest {
    pub vault_uid: i64,
    pub token: String,
}

pub async fn share_list(
    State(state): State<AppState>,
    Json(req): Json<ShareListRequest>,
) -> ApiResult {
    let token = repo::users::require_token(&state.pool, &req.token).await?;

    repo::vaults::get(&state.pool, req.vault_uid, Some(token.user_id), false)
        .await?
        .ok_or(Error::AuthDenied)?;

    let shares: Vec<Value> = repo::vaults::list_shares(&state.pool, req.vault_uid)
        .await?
        .iter()
        .map(|user| {
            json!({
                "uid": user.id.to_string(),
                "name": user.name,
                "email": user.email,
                "accepted": true,
            })
        })
        .collect();

    Ok(Json(json!({"shares": shares})))
}

#[derive(Debug, Deserialize)]
pub struct ShareInviteRequest {
    pub vault_uid: i64,
    pub email: String,
    pub token: String,
}

pub async fn share_invite(
    State(state): State<AppState>,
    Json(req): Json<ShareInviteRequest>,
) -> ApiResult {
    let token = repo::users::require_token(&state.pool, &req.token).await?;

    repo::vaults::get(&state.pool, req.vault_uid, Some(token.user_id), false)
        .await?
        .ok_or(Error::AuthDenied)?;

    let Some(user) = repo::users::get_by_email(&state.pool, &req.email).await? else {
        return Ok(Json(json!({"error": "User not found"})));
    };

    repo::vaults::add_share(&state.pool, req.vault_uid, user.id).await?;
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct ShareRemoveRequest {
    pub vault_uid: i64,
    pub share_uid: Option<String>,
    pub token: String,
}

pub async fn share_remove(
    State(state): State<AppState>,
    Json(req): Json<ShareRemoveRequest>,
) -> ApiResult {
    let token = repo::users::require_token(&state.pool, &req.token).await?;

    // with a share_uid the caller must own the vault; without one a
    // shared user is removing themselves
    let is_owner = req.share_uid.is_some();
    repo::vaults::get(&state.pool, req.vault_uid, Some(token.user_id), !is_owner)
        .await?
        .ok_or(Error::AuthDenied)?;

    let user_id = match &req.share_uid {
        Some(uid) => uid
            .parse()
            .map_err(|_| Error::validation(format!("invalid share uid: {uid}")))?,
        None => token.user_id,
    };

    repo::vaults::remove_share(&state.pool, req.vault_uid, user_id).await?;
    Ok(Json(json!({})))
}
