//! HTTP and sync routers.

pub mod sync;
pub mod user;
pub mod vault;

use std::sync::Arc;

use axum::extract::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use vault_sync_core::hub::VaultChannels;
use vault_sync_core::storage::BlobStore;
use vault_sync_core::Error;

use crate::config::Settings;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub store: BlobStore,
    pub hub: Arc<VaultChannels>,
    pub settings: Settings,
}

impl AppState {
    pub fn new(pool: SqlitePool, store: BlobStore, settings: Settings) -> Self {
        Self {
            pool,
            store,
            hub: Arc::new(VaultChannels::new()),
            settings,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/sync", get(sync::index))
        .route("/user/signin", post(user::signin))
        .route("/user/info", post(user::info))
        .route("/user/signout", post(user::signout))
        .route("/vault/list", post(vault::list))
        .route("/vault/create", post(vault::create))
        .route("/vault/delete", post(vault::delete))
        .route("/vault/access", post(vault::access))
        .route("/vault/share/list", post(vault::share_list))
        .route("/vault/share/invite", post(vault::share_invite))
        .route("/vault/share/remove", post(vault::share_remove));

    if state.settings.debug {
        router = router.route("/sync/status", get(sync::status));
    }

    // the note-taking client calls in from app-scheme origins
    router
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Domain errors rendered the way the client expects: a JSON body
/// carrying the message and the status code.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::AuthMissing => StatusCode::UNAUTHORIZED,
            Error::AuthDenied | Error::InvalidKey => StatusCode::FORBIDDEN,
            Error::VaultNotFound | Error::RecordNotFound => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Database(_) | Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(error = %self.0, "request failed");

        let body = json!({
            "error": self.0.to_string(),
            "status_code": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult = Result<Json<Value>, ApiError>;
