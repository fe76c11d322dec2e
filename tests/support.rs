use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Shared state of the fake backend. Tests flip the knobs and read the
/// counters directly.
#[derive(Default)]
pub struct MockState {
    pub refresh_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub fail_refresh: AtomicBool,
    pub partial_refresh: AtomicBool,
    pub always_unauthorized: AtomicBool,
    pub refresh_delay_ms: AtomicU64,
    pub list_delay_ms: AtomicU64,
    token_seq: AtomicUsize,
    valid_access: Mutex<HashSet<String>>,
    valid_refresh: Mutex<Option<String>>,
    /// Listing pages keyed by cursor; the first page lives under "".
    pages: Mutex<HashMap<String, Value>>,
    pub list_bearers: Mutex<Vec<String>>,
}

impl MockState {
    fn mint_pair(&self) -> (String, String) {
        let seq = self.token_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("t{seq}");
        let refresh = format!("r{seq}");
        self.valid_access
            .lock()
            .unwrap()
            .insert(access.clone());
        *self.valid_refresh.lock().unwrap() = Some(refresh.clone());
        (access, refresh)
    }

    pub fn invalidate_access(&self, token: &str) {
        self.valid_access.lock().unwrap().remove(token);
    }

    pub fn is_access_valid(&self, token: &str) -> bool {
        self.valid_access.lock().unwrap().contains(token)
    }

    pub fn set_pages(&self, pages: Vec<(Option<&str>, Value)>) {
        let mut map = self.pages.lock().unwrap();
        map.clear();
        for (cursor, page) in pages {
            map.insert(cursor.unwrap_or("").to_string(), page);
        }
    }

    fn bearer_of(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<String, Response> {
        let token = self.bearer_of(headers).ok_or_else(unauthorized)?;
        if self.always_unauthorized.load(Ordering::SeqCst) || !self.is_access_valid(&token) {
            return Err(unauthorized());
        }
        Ok(token)
    }
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response()
}

pub fn page(ids: &[&str], next_cursor: Option<&str>) -> Value {
    let images: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "image_id": id,
                "s3_key": format!("uploads/{id}.png"),
                "status": "completed",
                "result_json": {},
                "created_at": "2026-08-01T00:00:00Z"
            })
        })
        .collect();
    json!({ "images": images, "next_cursor": next_cursor })
}

async fn handle_credentials(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let email = body.get("email").and_then(Value::as_str).unwrap_or("");
    let password = body.get("password").and_then(Value::as_str).unwrap_or("");
    if email.is_empty() || password.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing credentials" })))
            .into_response();
    }
    let (access, refresh) = state.mint_pair();
    Json(json!({ "access_token": access, "refresh_token": refresh })).into_response()
}

async fn handle_refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);

    let delay = state.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    if state.fail_refresh.load(Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "refresh rejected" })))
            .into_response();
    }

    let presented = body.get("refresh_token").and_then(Value::as_str).unwrap_or("");
    let expected = state.valid_refresh.lock().unwrap().clone();
    if expected.as_deref() != Some(presented) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unknown refresh token" })))
            .into_response();
    }

    let (access, refresh) = state.mint_pair();
    if state.partial_refresh.load(Ordering::SeqCst) {
        return Json(json!({ "access_token": access })).into_response();
    }
    Json(json!({ "access_token": access, "refresh_token": refresh })).into_response()
}

async fn handle_token(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = state.authorize(&headers) {
        return denied;
    }
    let days = body.get("days_valid").and_then(Value::as_u64).unwrap_or(30);
    Json(json!({ "token": format!("api-token-{days}d"), "expires_at": "2026-09-28T00:00:00Z" }))
        .into_response()
}

async fn handle_list(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.list_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(bearer) = state.bearer_of(&headers) {
        state.list_bearers.lock().unwrap().push(bearer);
    }

    let delay = state.list_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    if let Err(denied) = state.authorize(&headers) {
        return denied;
    }

    let limit = body.get("limit").and_then(Value::as_u64).unwrap_or(0);
    if limit < 1 || limit > 100 {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad limit" }))).into_response();
    }

    let cursor = body
        .get("cursor")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let pages = state.pages.lock().unwrap();
    match pages.get(&cursor) {
        Some(page) => Json(page.clone()).into_response(),
        None => Json(json!({ "images": [], "next_cursor": null })).into_response(),
    }
}

async fn handle_upload(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    state.upload_calls.fetch_add(1, Ordering::SeqCst);
    if let Err(denied) = state.authorize(&headers) {
        return denied;
    }

    let workflow = query.get("workflow").map(String::as_str).unwrap_or("");
    if workflow != "cloud" && workflow != "on_premise" {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad workflow" }))).into_response();
    }

    let mut names = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        names.push(field.file_name().unwrap_or("unnamed").to_string());
        let _ = field.bytes().await;
    }
    if names.is_empty() || names.len() > 2 {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad file count" })))
            .into_response();
    }

    let receipts: Vec<Value> = names
        .iter()
        .enumerate()
        .map(|(idx, _)| json!({ "image_id": format!("img-{idx}"), "status": "pending" }))
        .collect();
    Json(Value::Array(receipts)).into_response()
}

async fn handle_get_image(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = state.authorize(&headers) {
        return denied;
    }
    let Some(image_id) = query.get("image_id").filter(|v| !v.is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing image_id" })))
            .into_response();
    };
    Json(json!({
        "image_id": image_id,
        "s3_key": format!("uploads/{image_id}.png"),
        "status": "completed",
        "result_json": { "ok": true },
        "created_at": "2026-08-01T00:00:00Z"
    }))
    .into_response()
}

/// In-process backend bound to an ephemeral port. The server task is aborted
/// on drop.
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<MockState>,
    server: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let router = Router::new()
            .route("/login", post(handle_credentials))
            .route("/register", post(handle_credentials))
            .route("/refresh", post(handle_refresh))
            .route("/token", post(handle_token))
            .route("/images/list", post(handle_list))
            .route("/upload-images", post(handle_upload))
            .route("/get-image", get(handle_get_image))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self { addr, state, server }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn state(&self) -> &Arc<MockState> {
        &self.state
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}
