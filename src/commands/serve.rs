use std::net::SocketAddr;
use std::time::Duration;

use axum::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, FromRef, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{header, Request, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router, ServiceExt};
use serde_json::Value;
use tower::Layer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::controllers::paste;
use crate::error::ValidationError;
use crate::pages;
use crate::storage::{AnyStore, Store};
use crate::types::api::{parse_new_paste, CreatedPaste, Health, PasteView};
use crate::{App, AppError};

/// Header carrying a pinned "now" in epoch milliseconds, honored in test mode.
pub const TEST_NOW_HEADER: &str = "x-test-now-ms";

pub async fn run(app: App) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], app.config.port));

    if let Some(secs) = app.config.limits.purge_interval_secs {
        tokio::spawn(purge_periodically(app.store.clone(), Duration::from_secs(secs)));
    }
    if app.config.test_mode {
        warn!("test mode is on, clients can override the clock with {TEST_NOW_HEADER}");
    }

    info!("listening on {addr}");
    axum::Server::bind(&addr)
        .serve(ServiceExt::<Request<Body>>::into_make_service(router(app)))
        .with_graceful_shutdown(async {
            _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}

/// The routes, with trailing slashes trimmed before routing.
pub fn router(app: App) -> NormalizePath<Router> {
    NormalizePathLayer::trim_trailing_slash().layer(routes(app))
}

fn routes(app: App) -> Router {
    let max_upload_size = app.config.limits.max_upload_size;

    Router::new()
        .route("/", get(index))
        .route("/api/healthz", get(healthz))
        .route("/api/pastes", post(create_paste))
        .route("/api/pastes/:id", get(get_paste))
        .route("/p/:id", get(view_paste))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_size))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

async fn purge_periodically(store: AnyStore, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(err) = paste::purge_unavailable(&store, Clock::System).await {
            warn!("periodic purge failed: {err:?}");
        }
    }
}

/// The clock for one request: wall time, or the test header when allowed.
pub struct RequestClock(pub Clock);

#[async_trait]
impl<S> FromRequestParts<S> for RequestClock
where
    Config: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if !Config::from_ref(state).test_mode {
            return Ok(RequestClock(Clock::System));
        }

        let Some(value) = parts.headers.get(TEST_NOW_HEADER) else {
            return Ok(RequestClock(Clock::System));
        };

        value
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .and_then(Clock::from_millis)
            .map(RequestClock)
            .ok_or(ValidationError::InvalidClock.into())
    }
}

async fn index() -> Html<&'static str> {
    Html(pages::INDEX_PAGE)
}

async fn healthz(State(store): State<AnyStore>) -> impl IntoResponse {
    if store.is_healthy().await {
        (StatusCode::OK, Json(Health { ok: true, error: None }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Health {
                ok: false,
                error: Some("persistence unavailable"),
            }),
        )
    }
}

async fn create_paste(
    State(config): State<Config>,
    State(store): State<AnyStore>,
    RequestClock(clock): RequestClock,
    body: Bytes,
) -> crate::AppResult<impl IntoResponse> {
    let body: Value = serde_json::from_slice(&body).map_err(|_| ValidationError::InvalidBody)?;
    let new = parse_new_paste(&body)?;

    let paste = paste::create(&store, new, clock).await?;

    let path = format!("/p/{}", paste.id);
    let url = config.paste_url(&paste.id);

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, path)],
        Json(CreatedPaste { id: paste.id, url }),
    ))
}

async fn get_paste(
    State(store): State<AnyStore>,
    Path(id): Path<String>,
    RequestClock(clock): RequestClock,
) -> crate::AppResult<Json<PasteView>> {
    let paste = paste::retrieve(&store, &id, clock).await?;
    Ok(Json(paste.into()))
}

async fn view_paste(
    State(store): State<AnyStore>,
    Path(id): Path<String>,
    RequestClock(clock): RequestClock,
) -> impl IntoResponse {
    match paste::retrieve(&store, &id, clock).await {
        Ok(paste) => (StatusCode::OK, Html(pages::paste_page(&paste.into()))),
        Err(AppError::Unavailable) => (StatusCode::NOT_FOUND, Html(pages::unavailable_page())),
        Err(err) => {
            warn!("failed to serve paste page: {err:?}");
            (err.status_code(), Html(pages::error_page()))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::response::Response;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::storage::memory::MemoryStore;

    const T0: i64 = 1_700_000_000_000;

    fn test_app(test_mode: bool) -> NormalizePath<Router> {
        let config = Config::parse(&format!(
            r#"
            base_url = "http://paste.test"
            port = 3000
            test_mode = {test_mode}
            [storage]
            kind = "memory"
            [limits]
            max_upload_size = 1024
            "#
        ))
        .unwrap();

        router(App {
            config,
            store: MemoryStore::new().into(),
        })
    }

    fn post(body: &str, now: Option<i64>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/pastes")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(now) = now {
            builder = builder.header(TEST_NOW_HEADER, now.to_string());
        }
        builder.body(Body::from(body.to_owned())).unwrap()
    }

    fn get(uri: &str, now: Option<i64>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(now) = now {
            builder = builder.header(TEST_NOW_HEADER, now.to_string());
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn text_body(response: Response) -> String {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn create(app: &NormalizePath<Router>, body: Value, now: Option<i64>) -> String {
        let response = app.clone().oneshot(post(&body.to_string(), now)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        body["id"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn create_returns_id_url_and_location() {
        let app = test_app(false);
        let response = app
            .oneshot(post(r#"{"content": "hello"}"#, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let location = response.headers()[header::LOCATION].to_str().unwrap().to_owned();
        let body = json_body(response).await;
        let id = body["id"].as_str().unwrap();
        assert_eq!(location, format!("/p/{id}"));
        assert_eq!(body["url"], format!("http://paste.test/p/{id}"));
    }

    #[tokio::test]
    async fn single_view_paste_over_http() {
        let app = test_app(false);
        let id = create(&app, json!({"content": "hello", "max_views": 1}), None).await;

        let response = app.clone().oneshot(get(&format!("/api/pastes/{id}"), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"content": "hello", "remaining_views": 0, "expires_at": null})
        );

        let response = app.oneshot(get(&format!("/api/pastes/{id}"), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            json!({"error": "paste not found or unavailable"})
        );
    }

    #[tokio::test]
    async fn test_clock_drives_expiry() {
        let app = test_app(true);
        let id = create(&app, json!({"content": "x", "ttl_seconds": 60}), Some(T0)).await;
        let uri = format!("/api/pastes/{id}");

        let response = app.clone().oneshot(get(&uri, Some(T0 + 30_000))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["expires_at"], "2023-11-14T22:14:20.000Z");
        assert_eq!(body["remaining_views"], Value::Null);

        let response = app.oneshot(get(&uri, Some(T0 + 61_000))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_clock_is_ignored_outside_test_mode() {
        let app = test_app(false);
        let id = create(&app, json!({"content": "x", "ttl_seconds": 60}), None).await;

        // far in the future, but the header is not honored
        let later = chrono::Utc::now().timestamp_millis() + 3_600_000;
        let response = app.oneshot(get(&format!("/api/pastes/{id}"), Some(later))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_test_clock_is_rejected() {
        let app = test_app(true);
        let request = Request::builder()
            .uri("/api/pastes/whatever")
            .header(TEST_NOW_HEADER, "yesterday")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["field"], TEST_NOW_HEADER);
    }

    #[tokio::test]
    async fn validation_errors_name_the_field() {
        let cases = [
            (r#"{"content": ""}"#, "content"),
            (r#"{"content": "a", "ttl_seconds": 0}"#, "ttl_seconds"),
            (r#"{"content": "a", "max_views": 0}"#, "max_views"),
            (r#"{"content": "a", "max_views": "2"}"#, "max_views"),
            ("not json", "body"),
        ];

        for (body, field) in cases {
            let response = test_app(false).oneshot(post(body, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            let json = json_body(response).await;
            assert_eq!(json["field"], field, "{body}");
            assert!(json["error"].is_string());
        }
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let content = "a".repeat(4096);
        let body = json!({ "content": content }).to_string();
        let response = test_app(false).oneshot(post(&body, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn html_page_consumes_views_and_escapes() {
        let app = test_app(false);
        let id = create(&app, json!({"content": "<b>hi</b>", "max_views": 2}), None).await;
        let uri = format!("/p/{id}");

        let response = app.clone().oneshot(get(&uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = text_body(response).await;
        assert!(page.contains("&lt;b&gt;hi&lt;/b&gt;"));
        assert!(page.contains("1 views remaining"));

        // the page and the API draw from the same budget
        let response = app.clone().oneshot(get(&format!("/api/pastes/{id}"), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get(&uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(text_body(response).await.contains("unavailable"));
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let response = test_app(false).oneshot(get("/api/healthz", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"ok": true}));
    }

    #[tokio::test]
    async fn trailing_slashes_are_trimmed() {
        let app = test_app(false);
        let id = create(&app, json!({"content": "slash", "max_views": 1}), None).await;

        let response = app.clone().oneshot(get(&format!("/api/pastes/{id}/"), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["content"], "slash");

        let response = app.oneshot(get("/api/healthz/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn index_serves_form() {
        let response = test_app(false).oneshot(get("/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(text_body(response).await.contains("/api/pastes"));
    }
}
