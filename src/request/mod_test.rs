use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::*;
use crate::error::ErrorCode;
use crate::session::Session;

enum Step {
    Respond(HttpResponse),
    Fail(SendError),
    Hang,
}

/// Transport that replays a script; refresh calls use their own script.
#[derive(Default)]
struct ScriptedTransport {
    calls: Mutex<VecDeque<Step>>,
    refreshes: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<HttpRequest>>,
    refresh_seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    fn new(calls: Vec<Step>, refreshes: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(calls.into()),
            refreshes: Mutex::new(refreshes.into()),
            ..Self::default()
        })
    }

    fn attempts(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn refresh_attempts(&self) -> usize {
        self.refresh_seen.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> HttpRequest {
        self.seen.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SendError> {
        let step = if request.url.ends_with(REFRESH_PATH) {
            self.refresh_seen.lock().unwrap().push(request);
            self.refreshes.lock().unwrap().pop_front()
        } else {
            self.seen.lock().unwrap().push(request);
            self.calls.lock().unwrap().pop_front()
        };
        match step.unwrap_or(Step::Fail(SendError::Network("script exhausted".to_owned()))) {
            Step::Respond(response) => Ok(response),
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
        }
    }
}

fn json_response(status: u16, body: serde_json::Value) -> Step {
    Step::Respond(HttpResponse {
        status,
        headers: vec![("content-type".to_owned(), "application/json".to_owned())],
        body: body.to_string().into_bytes(),
    })
}

fn text_response(status: u16, body: &str) -> Step {
    Step::Respond(HttpResponse {
        status,
        headers: vec![("content-type".to_owned(), "text/plain".to_owned())],
        body: body.as_bytes().to_vec(),
    })
}

fn unauthorized() -> Step {
    Step::Respond(HttpResponse { status: 401, headers: Vec::new(), body: Vec::new() })
}

fn network_error() -> Step {
    Step::Fail(SendError::Network("connection reset".to_owned()))
}

fn logged_in_session() -> SessionStore {
    let session = SessionStore::in_memory();
    session
        .login(Session {
            token: Some("old-token".to_owned()),
            refresh_token: Some("refresh-1".to_owned()),
            ..Session::default()
        })
        .unwrap();
    session
}

fn client_with(transport: Arc<ScriptedTransport>, session: SessionStore) -> RequestClient {
    let config = RequestConfig {
        timeout: Duration::from_millis(1_000),
        max_retries: 2,
        retry_base: Duration::from_millis(200),
    };
    RequestClient::with_transport("http://api.test/", config, session, transport)
}

fn auth_fail_counter(client: &RequestClient) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let hook = counter.clone();
    client.set_on_auth_failed(move || {
        hook.fetch_add(1, Ordering::SeqCst);
    });
    counter
}

#[tokio::test(start_paused = true)]
async fn two_network_failures_then_success_returns_third_result() {
    let transport = ScriptedTransport::new(
        vec![network_error(), network_error(), json_response(200, json!({ "attempt": 3 }))],
        vec![],
    );
    let client = client_with(transport.clone(), logged_in_session());

    let body = client
        .request("/x", RequestOptions::get().max_retries(2))
        .await
        .unwrap();

    assert_eq!(body, ResponseBody::Json(json!({ "attempt": 3 })));
    assert_eq!(transport.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_exponentially() {
    let transport = ScriptedTransport::new(
        vec![network_error(), network_error(), json_response(200, json!({}))],
        vec![],
    );
    let client = client_with(transport, logged_in_session());

    let start = tokio::time::Instant::now();
    client.request("/x", RequestOptions::get()).await.unwrap();
    let elapsed = start.elapsed();

    // 200ms + 400ms of backoff.
    assert!(elapsed >= Duration::from_millis(600), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(700), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn timeouts_never_exceed_max_retries_plus_one_attempts() {
    let transport = ScriptedTransport::new((0..10).map(|_| Step::Hang).collect(), vec![]);
    let client = client_with(transport.clone(), logged_in_session());

    let err = client
        .request("/slow", RequestOptions::get().max_retries(3).timeout(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(err.retryable());
    assert_eq!(transport.attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn exhausted_network_retries_surface_network_error() {
    let transport = ScriptedTransport::new(vec![network_error(), network_error()], vec![]);
    let client = client_with(transport.clone(), logged_in_session());

    let err = client
        .request("/x", RequestOptions::get().max_retries(1))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Network);
    assert_eq!(err.error_code(), "E_NETWORK");
    assert_eq!(transport.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_then_refresh_retries_exactly_once() {
    let transport = ScriptedTransport::new(
        vec![json_response(401, json!({})), json_response(200, json!({ "ok": true }))],
        vec![json_response(200, json!({ "token": "new-token", "refreshToken": "refresh-2" }))],
    );
    let session = logged_in_session();
    let client = client_with(transport.clone(), session.clone());
    let failures = auth_fail_counter(&client);

    let body = client.request("/api/posts", RequestOptions::get()).await.unwrap();

    assert_eq!(body, ResponseBody::Json(json!({ "ok": true })));
    assert_eq!(transport.attempts(), 2);
    assert_eq!(transport.refresh_attempts(), 1);
    assert_eq!(transport.request(0).header("authorization"), Some("Bearer old-token"));
    assert_eq!(transport.request(1).header("authorization"), Some("Bearer new-token"));
    assert_eq!(session.token().as_deref(), Some("new-token"));
    assert_eq!(session.refresh_token().as_deref(), Some("refresh-2"));
    assert_eq!(failures.load(Ordering::SeqCst), 0);

    let refresh = transport.refresh_seen.lock().unwrap()[0].clone();
    assert_eq!(refresh.url, "http://api.test/api/auth/refresh");
    assert!(refresh.header("authorization").is_none());
    assert_eq!(refresh.body, Body::Json(json!({ "refreshToken": "refresh-1" })));
}

#[tokio::test(start_paused = true)]
async fn refresh_retry_does_not_consume_transient_budget() {
    let transport = ScriptedTransport::new(
        vec![json_response(401, json!({})), json_response(200, json!([]))],
        vec![json_response(200, json!({ "token": "new-token" }))],
    );
    let client = client_with(transport.clone(), logged_in_session());

    let body = client
        .request("/api/posts", RequestOptions::get().max_retries(0))
        .await
        .unwrap();

    assert_eq!(body, ResponseBody::Json(json!([])));
    assert_eq!(transport.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_invokes_callback_and_is_fatal() {
    let transport = ScriptedTransport::new(
        vec![unauthorized(), json_response(200, json!({}))],
        vec![json_response(403, json!({ "message": "refresh expired" }))],
    );
    let client = client_with(transport.clone(), logged_in_session());
    let failures = auth_fail_counter(&client);

    let err = client.request("/api/posts", RequestOptions::get()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Authorization);
    assert_eq!(err.status(), Some(401));
    assert_eq!(err.message, "Authentication required");
    assert_eq!(transport.attempts(), 1);
    assert_eq!(transport.refresh_attempts(), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn second_unauthorized_after_refresh_is_fatal() {
    let transport = ScriptedTransport::new(
        vec![json_response(401, json!({})), json_response(401, json!({ "message": "revoked" }))],
        vec![json_response(200, json!({ "token": "new-token" }))],
    );
    let client = client_with(transport.clone(), logged_in_session());
    let failures = auth_fail_counter(&client);

    let err = client.request("/api/posts", RequestOptions::get()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Authorization);
    assert_eq!(err.message, "revoked");
    assert_eq!(transport.attempts(), 2);
    assert_eq!(transport.refresh_attempts(), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_refresh_token_skips_refresh_call() {
    let transport = ScriptedTransport::new(vec![json_response(401, json!({}))], vec![]);
    let session = SessionStore::in_memory();
    session
        .login(Session { token: Some("old-token".to_owned()), ..Session::default() })
        .unwrap();
    let client = client_with(transport.clone(), session);
    let failures = auth_fail_counter(&client);

    let err = client.request("/api/posts", RequestOptions::get()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Authorization);
    assert_eq!(transport.refresh_attempts(), 0);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn refresh_without_token_field_fails() {
    let transport = ScriptedTransport::new(
        vec![json_response(401, json!({}))],
        vec![json_response(200, json!({ "status": "ok" }))],
    );
    let client = client_with(transport.clone(), logged_in_session());

    let err = client.request("/api/posts", RequestOptions::get()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Authorization);
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn server_errors_are_terminal() {
    let transport = ScriptedTransport::new(
        vec![json_response(500, json!({ "message": "boom" })), json_response(200, json!({}))],
        vec![],
    );
    let client = client_with(transport.clone(), logged_in_session());

    let err = client.request("/x", RequestOptions::get()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Server { status: 500 });
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.message, "boom");
    assert_eq!(err.raw, Some(json!({ "message": "boom" })));
    assert!(!err.retryable());
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn text_error_body_is_kept_raw() {
    let transport = ScriptedTransport::new(vec![text_response(404, "no such listing")], vec![]);
    let client = client_with(transport, logged_in_session());

    let err = client.request("/x", RequestOptions::get()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Server { status: 404 });
    assert_eq!(err.message, "Request failed: 404");
    assert_eq!(err.raw, Some(json!("no such listing")));
}

#[tokio::test(start_paused = true)]
async fn anonymous_requests_skip_bearer_and_refresh() {
    let transport = ScriptedTransport::new(
        vec![json_response(401, json!({ "message": "bad credentials" }))],
        vec![json_response(200, json!({ "token": "never" }))],
    );
    let client = client_with(transport.clone(), logged_in_session());
    let failures = auth_fail_counter(&client);

    let err = client
        .request("/api/auth/login", RequestOptions::post().json(json!({})).anonymous())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Authorization);
    assert_eq!(err.message, "bad credentials");
    assert!(transport.request(0).header("authorization").is_none());
    assert_eq!(transport.refresh_attempts(), 0);
    assert_eq!(failures.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn caller_headers_follow_bearer_header() {
    let transport = ScriptedTransport::new(vec![json_response(200, json!({}))], vec![]);
    let client = client_with(transport.clone(), logged_in_session());

    client
        .request("/x", RequestOptions::get().header("X-Trace", "abc"))
        .await
        .unwrap();

    let sent = transport.request(0);
    assert_eq!(sent.headers[0], ("Authorization".to_owned(), "Bearer old-token".to_owned()));
    assert_eq!(sent.header("x-trace"), Some("abc"));
}

#[tokio::test(start_paused = true)]
async fn expect_json_falls_back_to_text_for_plain_bodies() {
    let transport = ScriptedTransport::new(vec![text_response(200, "accepted")], vec![]);
    let client = client_with(transport, logged_in_session());

    let body = client.request("/x", RequestOptions::post()).await.unwrap();
    assert_eq!(body, ResponseBody::Text("accepted".to_owned()));
    assert_eq!(body.into_text(), "accepted");
}

#[tokio::test(start_paused = true)]
async fn expect_raw_returns_untouched_response() {
    let transport = ScriptedTransport::new(
        vec![Step::Respond(HttpResponse {
            status: 200,
            headers: vec![("content-type".to_owned(), "application/pdf".to_owned())],
            body: vec![0x25, 0x50, 0x44, 0x46],
        })],
        vec![],
    );
    let client = client_with(transport, logged_in_session());

    let body = client
        .request("/api/contracts/1/download", RequestOptions::get().expect(Expect::Raw))
        .await
        .unwrap();
    let ResponseBody::Raw(raw) = body else {
        panic!("expected raw body");
    };
    assert_eq!(raw.body, b"%PDF");
    assert_eq!(raw.header("Content-Type"), Some("application/pdf"));
}

#[tokio::test(start_paused = true)]
async fn malformed_json_body_is_decode_error() {
    let transport = ScriptedTransport::new(
        vec![Step::Respond(HttpResponse {
            status: 200,
            headers: vec![("content-type".to_owned(), "application/json".to_owned())],
            body: b"{oops".to_vec(),
        })],
        vec![],
    );
    let client = client_with(transport.clone(), logged_in_session());

    let err = client.request("/x", RequestOptions::get()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Decode);
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_json_body_decodes_as_null() {
    let transport = ScriptedTransport::new(
        vec![Step::Respond(HttpResponse {
            status: 204,
            headers: vec![("content-type".to_owned(), "application/json".to_owned())],
            body: Vec::new(),
        })],
        vec![],
    );
    let client = client_with(transport, logged_in_session());

    let body = client.request("/x", RequestOptions::delete()).await.unwrap();
    assert_eq!(body, ResponseBody::Json(serde_json::Value::Null));
}

#[derive(Debug, serde::Deserialize, PartialEq)]
struct Listing {
    id: u64,
    title: String,
}

#[tokio::test(start_paused = true)]
async fn request_json_decodes_typed_payload() {
    let transport = ScriptedTransport::new(
        vec![
            json_response(200, json!({ "id": 3, "title": "Vélo" })),
            json_response(200, json!({ "id": "three" })),
        ],
        vec![],
    );
    let client = client_with(transport, logged_in_session());

    let listing: Listing = client
        .request_json("/api/marketplace/listings/3", RequestOptions::get())
        .await
        .unwrap();
    assert_eq!(listing, Listing { id: 3, title: "Vélo".to_owned() });

    let err = client
        .request_json::<Listing>("/api/marketplace/listings/3", RequestOptions::get())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Decode);
}

#[test]
fn resolve_url_joins_base_and_passes_absolute_urls() {
    let transport = ScriptedTransport::new(vec![], vec![]);
    let client = client_with(transport, SessionStore::in_memory());

    assert_eq!(client.resolve_url("/api/posts"), "http://api.test/api/posts");
    assert_eq!(client.resolve_url("api/posts"), "http://api.test/api/posts");
    assert_eq!(client.resolve_url("https://cdn.test/a.png"), "https://cdn.test/a.png");

    client.set_base_url("http://other.test/");
    assert_eq!(client.resolve_url("/x"), "http://other.test/x");
}
