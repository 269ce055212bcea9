//! End-to-end tests: proxy router in front of a local fake identity service.

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http_body_util::BodyExt;
use identity_proxy::proxy::{ProxyConfig, proxy_routes, resolve_session};
use identity_proxy::proxy::{ProxyServices, SDK_HEADER};
use identity_proxy::{JwtPayloadDeriver, TokenBundle};
use serde_json::{Value, json};
use tower::ServiceExt;

const PASSWORD: &str = "0123456789abcdef0123456789abcdef";
const EXP: i64 = 4_102_444_800;

fn jwt(payload: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{payload}.sig")
}

async fn login(headers: HeaderMap, body: String) -> Json<Value> {
    Json(json!({
        "accessToken": jwt(json!({"sub": "user-1", "exp": EXP})),
        "refreshToken": "refresh-1",
        "seen": {
            "fe_device": headers.get("fe_device").and_then(|v| v.to_str().ok()),
            "cookie": headers.contains_key(COOKIE),
            "middleware": headers.get("x-identity-middleware").and_then(|v| v.to_str().ok()),
            "sdk": headers.get(SDK_HEADER).and_then(|v| v.to_str().ok()),
            "content_type": headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            "body": body,
        },
    }))
}

async fn logout() -> Response {
    ([(SET_COOKIE, "fe_device=gone; Path=/; Max-Age=0")], Json(json!({}))).into_response()
}

async fn echo_path(uri: Uri) -> String {
    uri.path().to_string()
}

async fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, Json(json!({"error": "nope"}))).into_response()
}

/// Spawn the fake identity service and return its base URL.
async fn spawn_upstream() -> String {
    let app = Router::new()
        .route("/identity/resources/auth/v1/user", post(login))
        .route("/identity/resources/auth/v1/logout", post(logout))
        .route("/identity/resources/users/v2/me", get(forbidden))
        .fallback(echo_path);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn config(base_url: &str) -> ProxyConfig {
    ProxyConfig::new(
        "http://app.localhost".parse().unwrap(),
        base_url.parse().unwrap(),
        "client-1",
        PASSWORD,
    )
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// `Cookie` request header a browser would send for the given `Set-Cookie` values.
fn cookie_header(set_cookies: &[String]) -> String {
    set_cookies
        .iter()
        .filter_map(|h| h.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}

#[tokio::test]
async fn test_login_mints_session_cookie() {
    let base_url = spawn_upstream().await;
    let app = proxy_routes(config(&base_url), JwtPayloadDeriver).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/identity/identity/resources/auth/v1/user")
        .header(COOKIE, "fe_device=d-1; fe_session-1=stale; other=x")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("email=a%40b.c&password=pw"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    assert!(cookies.iter().any(|c| c.starts_with("fe_session-1=")));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&body).unwrap();
    let seen = &body["seen"];
    assert_eq!(seen["fe_device"], "d-1");
    assert_eq!(seen["cookie"], false);
    assert_eq!(seen["middleware"], "true");
    assert!(seen["sdk"].as_str().unwrap().starts_with("identity-proxy@"));
    assert_eq!(seen["content_type"], "application/json");
    let forwarded: Value = serde_json::from_str(seen["body"].as_str().unwrap()).unwrap();
    assert_eq!(forwarded, json!({"email": "a@b.c", "password": "pw"}));

    // The minted cookie unseals back to the derived bundle.
    let services = ProxyServices::new(config(&base_url)).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, cookie_header(&cookies).parse().unwrap());
    let bundle: TokenBundle = resolve_session(&services, &headers).unwrap();
    assert_eq!(bundle.expires_at, EXP);
    assert_eq!(bundle.refresh_token.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn test_logout_clears_session_chunks() {
    let base_url = spawn_upstream().await;
    let app = proxy_routes(config(&base_url), JwtPayloadDeriver).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/identity/identity/resources/auth/v1/logout")
        .header(COOKIE, "fe_session-1=a; fe_session-2=b")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    assert!(cookies.iter().any(|c| c.starts_with("fe_device=gone")));
    for name in ["fe_session-1=", "fe_session-2="] {
        let removal = cookies.iter().find(|c| c.starts_with(name)).unwrap();
        assert!(removal.contains("Max-Age=0"), "{removal}");
    }
}

#[tokio::test]
async fn test_hosted_logout_redirects() {
    let base_url = spawn_upstream().await;
    let app = proxy_routes(config(&base_url).with_hosted_login(true), JwtPayloadDeriver).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/identity/identity/resources/auth/v1/logout")
        .header("referer", "http://app.localhost/dashboard")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert_eq!(
        location,
        format!(
            "{base_url}/oauth/logout?post_logout_redirect_uri=http%3A%2F%2Fapp.localhost%2Fdashboard"
        )
    );
}

#[tokio::test]
async fn test_upstream_error_passes_through() {
    let base_url = spawn_upstream().await;
    let app = proxy_routes(config(&base_url), JwtPayloadDeriver).unwrap();

    let request = Request::builder()
        .uri("/api/identity/identity/resources/users/v2/me")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(set_cookies(&response).is_empty());

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), br#"{"error":"nope"}"#);
}

#[tokio::test]
async fn test_encoded_path_reaches_upstream_unchanged() {
    let base_url = spawn_upstream().await;

    for path in ["/users/a%2Fb", "/users/a%2541"] {
        let app = proxy_routes(config(&base_url), JwtPayloadDeriver).unwrap();
        let request = Request::builder()
            .uri(format!("/api/identity{path}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), path.as_bytes());
    }
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let app = proxy_routes(config(&format!("http://{addr}")), JwtPayloadDeriver).unwrap();
    let request = Request::builder()
        .uri("/api/identity/identity/resources/users/v2/me")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}
