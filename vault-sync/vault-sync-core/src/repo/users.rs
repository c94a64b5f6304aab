//! Users and their bearer tokens.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::crypto;
use crate::error::{Error, Result};
use crate::model::{User, UserToken};

pub async fn create(pool: &SqlitePool, name: &str, email: &str, password: &str) -> Result<User> {
    let salt = crypto::generate_secret();
    let hash = crypto::hash_password(password, &salt);
    let now = Utc::now();

    let id = sqlx::query(
        "INSERT INTO user (email, password, salt, name, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(email)
    .bind(&hash)
    .bind(&salt)
    .bind(name)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(User {
        id,
        email: email.to_string(),
        password: hash,
        salt,
        name: name.to_string(),
        created_at: now,
    })
}

pub async fn get_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    Ok(sqlx::query_as("SELECT * FROM user WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?)
}

pub async fn get_by_token(pool: &SqlitePool, token: &str) -> Result<Option<User>> {
    Ok(sqlx::query_as(
        "SELECT user.* FROM user JOIN user_token ON user_token.user_id = user.id \
         WHERE user_token.token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?)
}

/// Resolves a bearer token or fails the way the sync and HTTP layers
/// expect: empty means no credentials at all, unknown means denied.
pub async fn require_token(pool: &SqlitePool, token: &str) -> Result<UserToken> {
    if token.is_empty() {
        return Err(Error::AuthMissing);
    }

    sqlx::query_as("SELECT * FROM user_token WHERE token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?
        .ok_or(Error::AuthDenied)
}

/// Mints a fresh sign-in token for the user.
pub async fn create_token(pool: &SqlitePool, user_id: i64) -> Result<String> {
    let token = crypto::generate_token();
    sqlx::query("INSERT INTO user_token (user_id, token, created_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(&token)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(token)
}

pub async fn delete_token(pool: &SqlitePool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM user_token WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}
