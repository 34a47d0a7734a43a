use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use http_auth_refresh::{
    AuthRefresh, AuthRefreshOptions, Client, FailedRequest, HttpRequest, TransportOptions,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Clone)]
struct AuthState {
    token: Arc<Mutex<String>>,
    api_hits: Arc<AtomicUsize>,
    refresh_hits: Arc<AtomicUsize>,
    refresh_status: StatusCode,
    refresh_delay: Duration,
}

async fn me_handler(State(state): State<AuthState>, headers: HeaderMap) -> impl IntoResponse {
    state.api_hits.fetch_add(1, Ordering::SeqCst);

    let expected = format!(
        "Bearer {}",
        state
            .token
            .lock()
            .expect("server token mutex must not be poisoned")
    );
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if presented == Some(expected.as_str()) {
        (StatusCode::OK, Json(json!({"user": "kit"})))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid token"})),
        )
    }
}

async fn public_handler(State(state): State<AuthState>) -> impl IntoResponse {
    state.api_hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, Json(json!({"status": "up"})))
}

async fn refresh_handler(State(state): State<AuthState>) -> impl IntoResponse {
    let generation = state.refresh_hits.fetch_add(1, Ordering::SeqCst) + 1;

    if !state.refresh_delay.is_zero() {
        tokio::time::sleep(state.refresh_delay).await;
    }

    if state.refresh_status != StatusCode::OK {
        return (
            state.refresh_status,
            Json(json!({"error": "refresh rejected"})),
        );
    }

    let token = format!("token-{generation}");
    *state
        .token
        .lock()
        .expect("server token mutex must not be poisoned") = token.clone();
    (StatusCode::OK, Json(json!({"access_token": token})))
}

struct TestServer {
    base_url: String,
    api_hits: Arc<AtomicUsize>,
    refresh_hits: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn spawn_server(refresh_status: StatusCode, refresh_delay: Duration) -> TestServer {
    let state = AuthState {
        token: Arc::new(Mutex::new("token-0".to_owned())),
        api_hits: Arc::new(AtomicUsize::new(0)),
        refresh_hits: Arc::new(AtomicUsize::new(0)),
        refresh_status,
        refresh_delay,
    };

    let app = Router::new()
        .route("/api/me", get(me_handler))
        .route("/api/public", get(public_handler))
        .route("/auth/refresh", post(refresh_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        api_hits: state.api_hits,
        refresh_hits: state.refresh_hits,
        task,
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client-side token holder shared by the refresher and the retry transform.
#[derive(Clone)]
struct TokenStore(Arc<Mutex<String>>);

impl TokenStore {
    fn new(token: &str) -> Self {
        Self(Arc::new(Mutex::new(token.to_owned())))
    }

    fn get(&self) -> String {
        self.0
            .lock()
            .expect("token store mutex must not be poisoned")
            .clone()
    }

    fn set(&self, token: String) {
        *self.0.lock().expect("token store mutex must not be poisoned") = token;
    }
}

fn augmented_client(server: &TestServer, store: &TokenStore) -> Client {
    let base = Client::from_reqwest_with_options(
        reqwest::Client::new(),
        TransportOptions { timeout_ms: 2_000 },
    );

    let refresh_client = base.clone();
    let refresh_url = server.url("/auth/refresh");
    let refresh_store = store.clone();
    let refresher = move |_failed: FailedRequest| {
        let client = refresh_client.clone();
        let url = refresh_url.clone();
        let store = refresh_store.clone();
        async move {
            let response = client
                .send(HttpRequest::post(url))
                .await
                .map_err(|err| err.to_string())?;
            if !response.is_success() {
                return Err(format!("refresh endpoint returned {}", response.status()));
            }
            let body: TokenResponse = response.json().map_err(|err| err.to_string())?;
            store.set(body.access_token);
            Ok(())
        }
    };

    let retry_store = store.clone();
    let options = AuthRefreshOptions::default().with_on_retry(move |mut request: HttpRequest| {
        let token = retry_store.get();
        async move {
            request.set_bearer_auth(&token);
            request
        }
    });

    AuthRefresh::new(refresher)
        .options(options)
        .install(&base)
        .expect("hook must install")
}

#[tokio::test]
async fn unauthorized_request_is_refreshed_and_retried() {
    let server = spawn_server(StatusCode::OK, Duration::ZERO).await;
    let store = TokenStore::new("stale");
    let client = augmented_client(&server, &store);

    let response = client
        .send(HttpRequest::get(server.url("/api/me")).bearer_auth(&store.get()))
        .await
        .expect("request must succeed after refresh");

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().expect("body must be json");
    assert_eq!(body["user"], "kit");
    assert_eq!(store.get(), "token-1");
    assert_eq!(server.refresh_hits.load(Ordering::SeqCst), 1);
    assert_eq!(server.api_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_single_refresh() {
    let server = spawn_server(StatusCode::OK, Duration::from_millis(150)).await;
    let store = TokenStore::new("stale");
    let client = augmented_client(&server, &store);

    let send = |client: &Client| {
        let client = client.clone();
        let request = HttpRequest::get(server.url("/api/me")).bearer_auth(&store.get());
        async move { client.send(request).await }
    };

    let (first, second, third) = tokio::join!(send(&client), send(&client), send(&client));

    for outcome in [first, second, third] {
        let response = outcome.expect("request must succeed after shared refresh");
        assert_eq!(response.status().as_u16(), 200);
    }
    assert_eq!(server.refresh_hits.load(Ordering::SeqCst), 1);
    assert_eq!(server.api_hits.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn failed_refresh_returns_original_unauthorized_response() {
    let server = spawn_server(StatusCode::INTERNAL_SERVER_ERROR, Duration::ZERO).await;
    let store = TokenStore::new("stale");
    let client = augmented_client(&server, &store);

    let response = client
        .send(HttpRequest::get(server.url("/api/me")).bearer_auth(&store.get()))
        .await
        .expect("original response must be returned");

    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(store.get(), "stale");
    assert_eq!(server.refresh_hits.load(Ordering::SeqCst), 1);
    assert_eq!(server.api_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn successful_response_never_refreshes() {
    let server = spawn_server(StatusCode::OK, Duration::ZERO).await;
    let store = TokenStore::new("stale");
    let client = augmented_client(&server, &store);

    let response = client
        .send(HttpRequest::get(server.url("/api/public")))
        .await
        .expect("request must succeed");

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(server.refresh_hits.load(Ordering::SeqCst), 0);
    assert_eq!(server.api_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn skip_auth_refresh_returns_unauthorized_untouched() {
    let server = spawn_server(StatusCode::OK, Duration::ZERO).await;
    let store = TokenStore::new("stale");
    let client = augmented_client(&server, &store);

    let response = client
        .send(
            HttpRequest::get(server.url("/api/me"))
                .bearer_auth(&store.get())
                .skip_auth_refresh(),
        )
        .await
        .expect("transport must answer");

    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(server.refresh_hits.load(Ordering::SeqCst), 0);
    assert_eq!(server.api_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn later_failure_after_cleanup_starts_new_refresh() {
    let server = spawn_server(StatusCode::OK, Duration::ZERO).await;
    let store = TokenStore::new("stale");
    let client = augmented_client(&server, &store);

    let first = client
        .send(HttpRequest::get(server.url("/api/me")).bearer_auth("stale"))
        .await
        .expect("first request must succeed");
    let second = client
        .send(HttpRequest::get(server.url("/api/me")).bearer_auth("revoked"))
        .await
        .expect("second request must succeed");

    assert_eq!(first.status().as_u16(), 200);
    assert_eq!(second.status().as_u16(), 200);
    assert_eq!(store.get(), "token-2");
    assert_eq!(server.refresh_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_host_surfaces_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind probe listener");
    let address = listener.local_addr().expect("must have local addr");
    drop(listener);

    let base = Client::reqwest();
    let client = AuthRefresh::new(|_failed: FailedRequest| async { Ok::<(), String>(()) })
        .install(&base)
        .expect("hook must install");

    let err = client
        .send(HttpRequest::get(format!("http://{address}/api/me")))
        .await
        .expect_err("connection must fail");

    assert!(err.is_network_failure());
}
