//! Management console JSON API
//!
//! Identity is established by the auth gateway in front of this server, which
//! forwards the account id in `x-user-id`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use scripthub_core::store::StoreError;
use scripthub_core::{
    ConsoleError, NewBlacklistEntry, NewKey, NewScript, NewWhitelistEntry, ScriptUpdate,
};
use serde::Deserialize;

use crate::AppState;

pub const USER_HEADER: &str = "x-user-id";

/// Authenticated account id
pub struct Owner(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

pub struct ApiError(ConsoleError);

impl From<ConsoleError> for ApiError {
    fn from(e: ConsoleError) -> Self {
        ApiError(e)
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            ConsoleError::NotFound => error_response(StatusCode::NOT_FOUND, "Not found"),
            ConsoleError::Invalid(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
            ConsoleError::Store(StoreError::Conflict(msg)) => {
                tracing::debug!("Console conflict: {}", msg);
                error_response(StatusCode::CONFLICT, "Conflict")
            }
            other => {
                tracing::error!("Console operation failed: {}", other);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
            }
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/overview", get(handle_overview))
        .route("/api/scripts", get(handle_list_scripts).post(handle_create_script))
        .route(
            "/api/scripts/:script_id",
            get(handle_get_script)
                .patch(handle_update_script)
                .delete(handle_delete_script),
        )
        .route("/api/scripts/:script_id/stats", get(handle_script_stats))
        .route("/api/scripts/:script_id/logs", get(handle_list_logs))
        .route(
            "/api/scripts/:script_id/keys",
            get(handle_list_keys).post(handle_generate_key),
        )
        .route(
            "/api/scripts/:script_id/whitelist",
            get(handle_list_whitelist).post(handle_add_whitelist),
        )
        .route(
            "/api/scripts/:script_id/whitelist/:entry_id",
            delete(handle_remove_whitelist),
        )
        .route("/api/keys/:key_id", delete(handle_delete_key))
        .route("/api/keys/:key_id/revoke", post(handle_revoke_key))
        .route("/api/keys/:key_id/reset-hwid", post(handle_reset_hwid))
        .route("/api/blacklist", get(handle_list_blacklist).post(handle_add_blacklist))
        .route("/api/blacklist/:entry_id", delete(handle_remove_blacklist))
}

fn done() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true }))
}

async fn handle_overview(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> ApiResult<scripthub_core::OwnerOverview> {
    Ok(Json(state.console.owner_overview(&owner).await?))
}

async fn handle_list_scripts(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> ApiResult<Vec<scripthub_core::Script>> {
    Ok(Json(state.console.list_scripts(&owner).await?))
}

async fn handle_create_script(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(body): Json<NewScript>,
) -> Result<(StatusCode, Json<scripthub_core::Script>), ApiError> {
    let script = state.console.create_script(&owner, body).await?;
    Ok((StatusCode::CREATED, Json(script)))
}

async fn handle_get_script(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(script_id): Path<String>,
) -> ApiResult<scripthub_core::Script> {
    Ok(Json(state.console.get_script(&owner, &script_id).await?))
}

async fn handle_update_script(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(script_id): Path<String>,
    Json(body): Json<ScriptUpdate>,
) -> ApiResult<scripthub_core::Script> {
    Ok(Json(state.console.update_script(&owner, &script_id, body).await?))
}

async fn handle_delete_script(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(script_id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.console.delete_script(&owner, &script_id).await?;
    Ok(done())
}

async fn handle_script_stats(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(script_id): Path<String>,
) -> ApiResult<scripthub_core::ScriptStats> {
    Ok(Json(state.console.script_stats(&owner, &script_id).await?))
}

async fn handle_list_logs(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(script_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Vec<scripthub_core::ExecutionLog>> {
    Ok(Json(
        state
            .console
            .list_logs(&owner, &script_id, query.limit)
            .await?,
    ))
}

async fn handle_list_keys(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(script_id): Path<String>,
) -> ApiResult<Vec<scripthub_core::ScriptKey>> {
    Ok(Json(state.console.list_keys(&owner, &script_id).await?))
}

async fn handle_generate_key(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(script_id): Path<String>,
    Json(body): Json<NewKey>,
) -> Result<(StatusCode, Json<scripthub_core::ScriptKey>), ApiError> {
    let key = state.console.generate_key(&owner, &script_id, body).await?;
    Ok((StatusCode::CREATED, Json(key)))
}

async fn handle_revoke_key(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(key_id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.console.revoke_key(&owner, &key_id).await?;
    Ok(done())
}

async fn handle_reset_hwid(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(key_id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.console.reset_hwid(&owner, &key_id).await?;
    Ok(done())
}

async fn handle_delete_key(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(key_id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.console.delete_key(&owner, &key_id).await?;
    Ok(done())
}

async fn handle_list_whitelist(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(script_id): Path<String>,
) -> ApiResult<Vec<scripthub_core::WhitelistEntry>> {
    Ok(Json(state.console.list_whitelist(&owner, &script_id).await?))
}

async fn handle_add_whitelist(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(script_id): Path<String>,
    Json(body): Json<NewWhitelistEntry>,
) -> Result<(StatusCode, Json<scripthub_core::WhitelistEntry>), ApiError> {
    let entry = state.console.add_whitelist(&owner, &script_id, body).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn handle_remove_whitelist(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path((script_id, entry_id)): Path<(String, String)>,
) -> ApiResult<serde_json::Value> {
    state
        .console
        .remove_whitelist(&owner, &script_id, &entry_id)
        .await?;
    Ok(done())
}

async fn handle_list_blacklist(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> ApiResult<Vec<scripthub_core::BlacklistEntry>> {
    Ok(Json(state.console.list_blacklist(&owner).await?))
}

async fn handle_add_blacklist(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(body): Json<NewBlacklistEntry>,
) -> Result<(StatusCode, Json<scripthub_core::BlacklistEntry>), ApiError> {
    let entry = state.console.add_blacklist(&owner, body).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn handle_remove_blacklist(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(entry_id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.console.remove_blacklist(&owner, &entry_id).await?;
    Ok(done())
}

#[cfg(test)]
mod tests {
    use crate::test_support::{body_text, test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn request(method: &str, uri: &str, owner: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(owner) = owner {
            builder = builder.header("x-user-id", owner);
        }
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected() {
        let app = crate::create_router(test_state(None));
        let response = app
            .oneshot(request("GET", "/api/scripts", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_script_and_key_flow() {
        let app = crate::create_router(test_state(None));

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/scripts",
                Some("owner-1"),
                Some(serde_json::json!({
                    "name": "Farm",
                    "source": "local x = 1",
                    "protection_mode": "key"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let script = json(response).await;
        assert_eq!(script["user_id"], "owner-1");
        assert_eq!(script["version"], 1);
        let script_id = script["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/scripts/{}/keys", script_id),
                Some("owner-1"),
                Some(serde_json::json!({ "max_uses": 5, "hwid_lock": true })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let key = json(response).await;
        assert!(key["key_value"].as_str().unwrap().starts_with("SH-"));

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/scripts/{}/keys", script_id),
                Some("owner-2"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(request("GET", "/api/overview", Some("owner-1"), None))
            .await
            .unwrap();
        let overview = json(response).await;
        assert_eq!(overview["total_scripts"], 1);
        assert_eq!(overview["key_scripts"], 1);
    }

    #[tokio::test]
    async fn test_invalid_input_is_bad_request() {
        let app = crate::create_router(test_state(None));
        let response = app
            .oneshot(request(
                "POST",
                "/api/blacklist",
                Some("owner-1"),
                Some(serde_json::json!({ "identifier": "  " })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
