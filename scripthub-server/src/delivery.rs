//! Delivery endpoint
//!
//! Classifies the caller before anything else. Browsers get a redirect or an
//! HTML page and never trigger a lookup; recognized script runtimes get a
//! `text/plain` body with status 200 whatever the verdict.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use scripthub_core::payload;
use scripthub_core::{DeliveryRequest, UNKNOWN_ADDRESS};
use serde::Deserialize;

use crate::AppState;

/// User-agent fragments of known script runtimes, lower-case
pub const CLIENT_SIGNATURES: &[&str] = &[
    "roblox",
    "synapse",
    "script-ware",
    "krnl",
    "fluxus",
    "oxygen",
    "electron",
    "evon",
    "arceus",
    "trigon",
    "delta",
    "hydrogen",
    "comet",
    "wave",
    "httpget",
    "luau",
    "celery",
    "sentinel",
    "sirhurt",
    "jjsploit",
];

const MAX_SCRIPT_ID_LEN: usize = 64;

#[derive(Debug, Default, Deserialize)]
pub struct DeliverQuery {
    pub key: Option<String>,
    pub hwid: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Deliver,
    Report,
    Verify,
}

impl Action {
    /// Unknown values behave like a plain delivery
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("report") => Action::Report,
            Some("verify") => Action::Verify,
            _ => Action::Deliver,
        }
    }
}

/// Whether the user agent belongs to a known script runtime
pub fn is_script_client(user_agent: Option<&str>) -> bool {
    let Some(agent) = user_agent else {
        return false;
    };
    let agent = agent.to_ascii_lowercase();
    CLIENT_SIGNATURES.iter().any(|sig| agent.contains(sig))
}

pub fn is_valid_script_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SCRIPT_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// First forwarded address, then the CDN header, then `unknown`
pub fn client_address(headers: &HeaderMap) -> String {
    header_value(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_value(headers, "cf-connecting-ip"))
        .unwrap_or(UNKNOWN_ADDRESS)
        .to_string()
}

/// Header wins over query parameter
fn credential(headers: &HeaderMap, header: &str, query: Option<String>) -> Option<String> {
    header_value(headers, header)
        .map(str::to_string)
        .or_else(|| query.filter(|v| !v.is_empty()))
}

fn plain_text(body: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        body.into(),
    )
        .into_response()
}

fn browser_response(state: &AppState, script_id: Option<&str>) -> Response {
    if let Some(base) = state.browser_redirect.as_deref() {
        let target = match script_id {
            Some(id) if is_valid_script_id(id) => format!("{}/{}", base.trim_end_matches('/'), id),
            _ => base.to_string(),
        };
        if let Ok(location) = HeaderValue::from_str(&target) {
            return (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
        }
        tracing::warn!("Browser redirect target is not a valid header value");
    }
    Html(access_denied_page(&state.brand)).into_response()
}

fn access_denied_page(brand: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{brand} | Access Denied</title>\n</head>\n<body>\n\
         <h1>Access Denied</h1>\n\
         <p>This script can only be loaded from inside a game client.</p>\n\
         </body>\n</html>\n"
    )
}

pub async fn handle_deliver(
    State(state): State<Arc<AppState>>,
    Path(script_id): Path<String>,
    Query(query): Query<DeliverQuery>,
    headers: HeaderMap,
) -> Response {
    dispatch(&state, Some(script_id), query, &headers).await
}

pub async fn handle_deliver_root(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeliverQuery>,
    headers: HeaderMap,
) -> Response {
    dispatch(&state, None, query, &headers).await
}

async fn dispatch(
    state: &Arc<AppState>,
    script_id: Option<String>,
    query: DeliverQuery,
    headers: &HeaderMap,
) -> Response {
    let user_agent = header_value(headers, header::USER_AGENT.as_str());
    if !is_script_client(user_agent) {
        return browser_response(state, script_id.as_deref());
    }

    let script_id = match script_id.filter(|id| is_valid_script_id(id)) {
        Some(id) => id,
        None => return plain_text(payload::diagnostic(&state.brand, "invalid script id")),
    };

    let key = credential(headers, "x-script-key", query.key);
    let hwid = credential(headers, "x-hwid", query.hwid);
    let client_ip = client_address(headers);

    match Action::parse(query.action.as_deref()) {
        Action::Report => {
            if let Some(hwid) = hwid {
                let engine = state.engine.clone();
                tokio::spawn(async move {
                    engine.report(&script_id, &client_ip, &hwid).await;
                });
            }
            plain_text("ok")
        }
        Action::Verify => {
            let outcome = state
                .engine
                .verify(
                    &script_id,
                    key.as_deref().unwrap_or_default(),
                    hwid.as_deref().unwrap_or_default(),
                )
                .await;
            plain_text(outcome.as_str())
        }
        Action::Deliver => {
            let request = DeliveryRequest {
                script_id,
                key,
                hwid,
                client_ip,
                user_agent: user_agent.map(str::to_string),
            };
            let verdict = state.engine.deliver(&request).await;
            plain_text(payload::render(&state.brand, &verdict))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{body_text, test_state};
    use axum::body::Body;
    use axum::http::Request;
    use scripthub_core::{ProtectionMode, RecordStore, Script, ScriptKey};
    use tower::ServiceExt;

    const RUNTIME_UA: &str = "Roblox/WinInet";
    const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0";

    fn get(uri: &str, user_agent: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("user-agent", user_agent)
            .body(Body::empty())
            .unwrap()
    }

    async fn insert_script(state: &AppState, id: &str, mode: ProtectionMode) -> Script {
        let mut script = Script::new("owner-1", "Test", "print('hello')", mode, chrono::Utc::now());
        script.id = id.to_string();
        state.engine.store().insert_script(script).await.unwrap()
    }

    #[test]
    fn test_classification() {
        assert!(is_script_client(Some("Roblox/WinInet")));
        assert!(is_script_client(Some("KRNL executor")));
        assert!(!is_script_client(Some(BROWSER_UA)));
        assert!(!is_script_client(None));
    }

    #[test]
    fn test_script_id_validation() {
        assert!(is_valid_script_id("abc-DEF_123"));
        assert!(!is_valid_script_id(""));
        assert!(!is_valid_script_id("abc/def"));
        assert!(!is_valid_script_id(&"a".repeat(65)));
    }

    #[test]
    fn test_client_address() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_address(&headers), "unknown");

        headers.insert("cf-connecting-ip", HeaderValue::from_static("5.6.7.8"));
        assert_eq!(client_address(&headers), "5.6.7.8");

        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 10.0.0.1"));
        assert_eq!(client_address(&headers), "1.2.3.4");
    }

    #[tokio::test]
    async fn test_browser_never_gets_payload() {
        let state = test_state(None);
        insert_script(&state, "keyless-1", ProtectionMode::Keyless).await;
        let app = crate::create_router(state.clone());

        let response = app.oneshot(get("/deliver/keyless-1", BROWSER_UA)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("Access Denied"));
        assert!(!body.contains("pcall"));

        // Classification happens before lookup, so nothing was logged
        let logs = state.engine.store().list_logs("keyless-1", 10).await.unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn test_browser_redirect() {
        let state = test_state(Some("https://hub.example/script/"));
        let app = crate::create_router(state);

        let response = app.oneshot(get("/loader/abc", BROWSER_UA)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://hub.example/script/abc"
        );
    }

    #[tokio::test]
    async fn test_missing_script_id_diagnostic() {
        let app = crate::create_router(test_state(None));

        let response = app.oneshot(get("/deliver", RUNTIME_UA)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
        let body = body_text(response).await;
        assert!(body.contains("warn(\"[ScriptHub] invalid script id\")"));
    }

    #[tokio::test]
    async fn test_keyless_delivery() {
        let state = test_state(None);
        insert_script(&state, "keyless-1", ProtectionMode::Keyless).await;
        let app = crate::create_router(state.clone());

        let request = Request::builder()
            .uri("/deliver/keyless-1")
            .header("user-agent", RUNTIME_UA)
            .header("x-hwid", "F1")
            .header("x-forwarded-for", "1.2.3.4")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        let body = body_text(response).await;
        assert!(body.starts_with("-- ScriptHub Protected"));

        let logs = state.engine.store().list_logs("keyless-1", 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].success);
        assert_eq!(logs[0].executor_ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(logs[0].user_agent.as_deref(), Some(RUNTIME_UA));
    }

    #[tokio::test]
    async fn test_denial_is_in_band() {
        let state = test_state(None);
        insert_script(&state, "keyed-1", ProtectionMode::Key).await;
        let app = crate::create_router(state);

        let response = app
            .oneshot(get("/deliver/keyed-1?key=SH-NOPE", RUNTIME_UA))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            "-- ScriptHub Protection\nwarn(\"[ScriptHub] invalid key\")\nreturn"
        );
    }

    #[tokio::test]
    async fn test_verify_action() {
        let state = test_state(None);
        let script = insert_script(&state, "keyed-1", ProtectionMode::Key).await;
        let mut key = ScriptKey::new(&script.id, "SH-KEY", chrono::Utc::now());
        key.hwid_lock_enabled = true;
        state.engine.store().insert_key(key).await.unwrap();

        let app = crate::create_router(state.clone());
        let uri = "/deliver/keyed-1?action=verify&key=SH-KEY&hwid=F1";
        let response = app.clone().oneshot(get(uri, RUNTIME_UA)).await.unwrap();
        assert_eq!(body_text(response).await, "ok");

        let uri = "/deliver/keyed-1?action=verify&key=SH-KEY&hwid=F2";
        let response = app.clone().oneshot(get(uri, RUNTIME_UA)).await.unwrap();
        assert_eq!(body_text(response).await, "locked");

        let uri = "/deliver/keyed-1?action=verify&key=SH-OTHER&hwid=F1";
        let response = app.oneshot(get(uri, RUNTIME_UA)).await.unwrap();
        assert_eq!(body_text(response).await, "invalid");
    }

    #[tokio::test]
    async fn test_report_action_returns_ok() {
        let state = test_state(None);
        let app = crate::create_router(state);

        let response = app
            .oneshot(get("/deliver/missing?action=report&hwid=F1", RUNTIME_UA))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "ok");
    }
}
