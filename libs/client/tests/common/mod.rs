//! In-process mock of the Tably backend: the REST auth endpoints plus the
//! realtime `/orders` websocket, instrumented with counters the tests
//! assert against.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time;

pub const PASSWORD: &str = "correct-horse";

const SESSION_COOKIE: &str = "sessionId=ses_mock_1; Path=/";

#[derive(Clone)]
pub struct Backend {
    pub refresh_hits: Arc<AtomicUsize>,
    pub refresh_delay_ms: Arc<AtomicUsize>,
    /// When false, refresh answers 401 with the standard envelope.
    pub refresh_ok: Arc<AtomicBool>,
    /// Whether the last refresh carried the session cookie.
    pub refresh_saw_cookie: Arc<AtomicBool>,
    /// Account status embedded in login/OTP responses.
    pub login_status: Arc<Mutex<String>>,
    /// When true, login answers with `otpRequired` instead of a session.
    pub otp_required: Arc<AtomicBool>,
    pub logout_hits: Arc<AtomicUsize>,
    /// When false, logout answers 500.
    pub logout_ok: Arc<AtomicBool>,
    /// Raw join/leave frames received over the websocket.
    pub joins: Arc<Mutex<Vec<String>>>,
    pub leaves: Arc<Mutex<Vec<String>>>,
    /// Token query param presented at the websocket handshake.
    pub ws_token: Arc<Mutex<Option<String>>>,
    /// Frames pushed here are forwarded to every connected websocket.
    pub push: broadcast::Sender<String>,
}

impl Backend {
    fn new() -> Self {
        let (push, _) = broadcast::channel(64);
        Self {
            refresh_hits: Arc::new(AtomicUsize::new(0)),
            refresh_delay_ms: Arc::new(AtomicUsize::new(0)),
            refresh_ok: Arc::new(AtomicBool::new(true)),
            refresh_saw_cookie: Arc::new(AtomicBool::new(false)),
            login_status: Arc::new(Mutex::new("ACTIVE".to_string())),
            otp_required: Arc::new(AtomicBool::new(false)),
            logout_hits: Arc::new(AtomicUsize::new(0)),
            logout_ok: Arc::new(AtomicBool::new(true)),
            joins: Arc::new(Mutex::new(Vec::new())),
            leaves: Arc::new(Mutex::new(Vec::new())),
            ws_token: Arc::new(Mutex::new(None)),
            push,
        }
    }

    pub fn join_count(&self) -> usize {
        self.joins.lock().unwrap().len()
    }

    pub fn leave_count(&self) -> usize {
        self.leaves.lock().unwrap().len()
    }
}

/// Start the mock backend on an ephemeral port. The server runs in the
/// background for the rest of the test.
pub async fn spawn_backend() -> (SocketAddr, Backend) {
    let backend = Backend::new();
    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/verify-otp", post(verify_otp))
        .route("/auth/refresh-session", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/orders", any(ws_upgrade))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, backend)
}

/// Poll `cond` until it holds or the deadline passes.
pub async fn wait_for(cond: impl Fn() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn sample_user(status: &str) -> Value {
    json!({
        "id": tably_common::id::prefixed_ulid(tably_common::id::prefix::USER),
        "email": "ops@tably.test",
        "name": "Ops User",
        "role": "MANAGER",
        "status": status,
        "emailVerified": true,
        "createdAt": "2026-01-01T00:00:00Z",
        "updatedAt": "2026-01-01T00:00:00Z",
    })
}

fn error_envelope(status: StatusCode, code: &str, message: &str) -> Response {
    let body = json!({ "error": { "code": code, "message": message } });
    (status, Json(body)).into_response()
}

fn with_session_cookie(body: Value) -> Response {
    let mut resp = Json(body).into_response();
    resp.headers_mut()
        .insert(SET_COOKIE, SESSION_COOKIE.parse().unwrap());
    resp
}

// ---------------------------------------------------------------------------
// REST handlers
// ---------------------------------------------------------------------------

async fn login(State(b): State<Backend>, Json(body): Json<Value>) -> Response {
    assert!(
        body["fingerprint"].is_string(),
        "login must carry a fingerprint"
    );
    if body["password"] != PASSWORD {
        return error_envelope(
            StatusCode::UNAUTHORIZED,
            "INVALID_CREDENTIALS",
            "Invalid email or password",
        );
    }
    if b.otp_required.load(Ordering::SeqCst) {
        return Json(json!({ "otpRequired": true })).into_response();
    }
    let status = b.login_status.lock().unwrap().clone();
    with_session_cookie(json!({
        "accessToken": "at_login_1",
        "user": sample_user(&status),
    }))
}

async fn verify_otp(State(b): State<Backend>, Json(body): Json<Value>) -> Response {
    if body["code"] != "123456" {
        return error_envelope(StatusCode::UNAUTHORIZED, "INVALID_OTP", "Invalid code");
    }
    let status = b.login_status.lock().unwrap().clone();
    with_session_cookie(json!({
        "accessToken": "at_otp_1",
        "user": sample_user(&status),
    }))
}

async fn refresh(State(b): State<Backend>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    assert!(
        body["fingerprint"].is_string(),
        "refresh must carry a fingerprint"
    );
    b.refresh_hits.fetch_add(1, Ordering::SeqCst);
    let saw_cookie = headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("sessionId="));
    b.refresh_saw_cookie.store(saw_cookie, Ordering::SeqCst);

    let delay = b.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        time::sleep(Duration::from_millis(delay as u64)).await;
    }
    if !b.refresh_ok.load(Ordering::SeqCst) {
        return error_envelope(
            StatusCode::UNAUTHORIZED,
            "SESSION_EXPIRED",
            "Session expired",
        );
    }
    with_session_cookie(json!({
        "accessToken": "at_refreshed_1",
        "user": sample_user("ACTIVE"),
    }))
}

async fn logout(State(b): State<Backend>) -> Response {
    b.logout_hits.fetch_add(1, Ordering::SeqCst);
    if !b.logout_ok.load(Ordering::SeqCst) {
        return error_envelope(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "logout failed",
        );
    }
    Json(json!({ "success": true })).into_response()
}

// ---------------------------------------------------------------------------
// Websocket handler
// ---------------------------------------------------------------------------

async fn ws_upgrade(
    State(b): State<Backend>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    *b.ws_token.lock().unwrap() = params.get("token").cloned();
    ws.on_upgrade(move |socket| handle_ws(socket, b))
}

async fn handle_ws(mut socket: WebSocket, b: Backend) {
    let mut push_rx = b.push.subscribe();
    loop {
        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    match frame["event"].as_str() {
                        Some("leaveRoom") => b.leaves.lock().unwrap().push(text.to_string()),
                        Some(event) if event.starts_with("join") => {
                            b.joins.lock().unwrap().push(text.to_string())
                        }
                        _ => {}
                    }
                }
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {}
                Some(Err(_)) => return,
            },
            pushed = push_rx.recv() => {
                if let Ok(text) = pushed {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
