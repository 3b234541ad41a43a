//! HTTP surface of the directory.

use crate::error::DirectoryError;
use crate::model::UserRecord;
use crate::{Directory, UpdateOutcome};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

type AppState = Arc<Directory>;

/// Error response carrying `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        let status = match &err {
            DirectoryError::Validation(_) => StatusCode::BAD_REQUEST,
            DirectoryError::NotFound(_) => StatusCode::NOT_FOUND,
            DirectoryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
struct ProfileListing {
    users: Vec<UserRecord>,
    count: usize,
}

#[derive(Debug, Serialize)]
struct IdListing {
    ids: Vec<String>,
    count: usize,
}

#[derive(Debug, Serialize)]
struct FlushResponse {
    flushed: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub fn router(directory: Arc<Directory>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/users/register", post(register))
        .route("/users/update", post(update))
        .route("/users/profile/:id", get(profile))
        .route("/users/get/:phone_number", get(profile_by_phone))
        .route("/users/get-all/profile", get(list_profiles))
        .route("/users/get-all/id", get(list_ids))
        .route("/users/delete/:id", get(delete))
        .route("/users/flush", get(flush))
        .layer(middleware::from_fn(log_request))
        .with_state(directory)
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    let latency_ms = started.elapsed().as_millis() as u64;
    info!(%method, path = %path, status = response.status().as_u16(), latency_ms, "request");
    response
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn register(
    State(directory): State<AppState>,
    body: Result<Json<UserRecord>, JsonRejection>,
) -> ApiResult<UserRecord> {
    let Json(record) = body?;
    Ok(Json(directory.register(record).await?))
}

async fn update(
    State(directory): State<AppState>,
    body: Result<Json<UserRecord>, JsonRejection>,
) -> ApiResult<UpdateOutcome> {
    let Json(record) = body?;
    Ok(Json(directory.update(record).await?))
}

async fn profile(State(directory): State<AppState>, Path(id): Path<String>) -> ApiResult<UserRecord> {
    Ok(Json(directory.profile(&id).await?))
}

async fn profile_by_phone(
    State(directory): State<AppState>,
    Path(phone_number): Path<String>,
) -> ApiResult<UserRecord> {
    Ok(Json(directory.profile_by_phone(&phone_number).await?))
}

async fn list_profiles(State(directory): State<AppState>) -> ApiResult<ProfileListing> {
    let users = directory.list_profiles().await?;
    let count = users.len();
    Ok(Json(ProfileListing { users, count }))
}

async fn list_ids(State(directory): State<AppState>) -> ApiResult<IdListing> {
    let ids = directory.list_ids().await?;
    let count = ids.len();
    Ok(Json(IdListing { ids, count }))
}

async fn delete(State(directory): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    directory.delete(&id).await?;
    Ok(Json(()))
}

async fn flush(State(directory): State<AppState>) -> ApiResult<FlushResponse> {
    let flushed = directory.flush().await?;
    Ok(Json(FlushResponse { flushed }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::persistence::DocumentStore;
    use crate::resolve::VariantPolicy;
    use crate::test_support::FaultyStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn cache_router() -> Router {
        let directory = Directory::new(Arc::new(CacheStore::new()), VariantPolicy::cache());
        router(Arc::new(directory))
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap_or_else(|err| panic!("failed to build request: {err}"));

        let response = router
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|err| panic!("router request failed: {err}"));
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap_or_else(|err| panic!("failed to read response body: {err}"));
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|err| panic!("response body is not JSON: {err}"));
        (status, value)
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let (status, body) = send(&cache_router(), "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn register_then_fetch_profile() {
        let router = cache_router();
        let (status, created) = send(
            &router,
            "POST",
            "/users/register",
            Some(json!({"name": "Ada", "phoneNumber": "+15550001"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = created["uuid"].as_str().unwrap().to_string();
        assert_eq!(created["phone_number"], "+15550001");

        let (status, fetched) = send(&router, "GET", &format!("/users/profile/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let router = cache_router();
        let request = Request::builder()
            .method("POST")
            .uri("/users/register")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_identifier_is_bad_request() {
        let (status, body) = send(&cache_router(), "GET", "/users/profile/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid identifier"));
    }

    #[tokio::test]
    async fn unknown_profile_is_not_found() {
        let uri = format!("/users/profile/{}", uuid::Uuid::new_v4());
        let (status, _) = send(&cache_router(), "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn conditional_update_returns_boolean() {
        let router = cache_router();
        let (_, created) = send(
            &router,
            "POST",
            "/users/register",
            Some(json!({"name": "Ada", "phone_number": "+15550001"})),
        )
        .await;

        let mut edited = created.clone();
        edited["status"] = json!("away");
        let (status, body) = send(&router, "POST", "/users/update", Some(edited)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(true));

        let (status, body) = send(
            &router,
            "POST",
            "/users/update",
            Some(json!({"uuid": uuid::Uuid::new_v4().to_string(), "name": "Ghost"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(false));
    }

    #[tokio::test]
    async fn update_without_keys_is_bad_request() {
        let (status, _) = send(
            &cache_router(),
            "POST",
            "/users/update",
            Some(json!({"name": "Nobody"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn listings_and_flush() {
        let router = cache_router();
        for phone in ["+15550001", "+15550002"] {
            send(&router, "POST", "/users/register", Some(json!({"name": "u", "phone_number": phone}))).await;
        }

        let (_, profiles) = send(&router, "GET", "/users/get-all/profile", None).await;
        assert_eq!(profiles["count"], 2);
        let (_, ids) = send(&router, "GET", "/users/get-all/id", None).await;
        assert_eq!(ids["count"], 2);
        assert!(ids["ids"]
            .as_array()
            .unwrap()
            .iter()
            .all(|id| !id.as_str().unwrap().starts_with("user:")));

        let (status, body) = send(&router, "GET", "/users/flush", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["flushed"], 2);
        let (_, profiles) = send(&router, "GET", "/users/get-all/profile", None).await;
        assert_eq!(profiles["count"], 0);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let router = cache_router();
        let (_, created) = send(
            &router,
            "POST",
            "/users/register",
            Some(json!({"name": "Ada", "phone_number": "+15550001"})),
        )
        .await;
        let uri = format!("/users/delete/{}", created["uuid"].as_str().unwrap());
        for _ in 0..2 {
            let (status, body) = send(&router, "GET", &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, Value::Null);
        }
    }

    #[tokio::test]
    async fn document_backend_phone_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        let router = router(Arc::new(Directory::new(Arc::new(store), VariantPolicy::document())));

        let (_, created) = send(
            &router,
            "POST",
            "/users/register",
            Some(json!({"name": "Ada", "phone_number": "+15550001"})),
        )
        .await;
        let (status, found) = send(&router, "GET", "/users/get/+15550001", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["uuid"], created["uuid"]);

        let (status, _) = send(&router, "GET", "/users/get/+15559999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&router, "GET", "/users/flush", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &router,
            "POST",
            "/users/register",
            Some(json!({"name": "NoPhone"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn phone_lookup_unsupported_on_cache() {
        let (status, body) = send(&cache_router(), "GET", "/users/get/+15550001", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not supported"));
    }

    #[tokio::test]
    async fn storage_failure_is_server_error() {
        let faulty = FaultyStore::new(Arc::new(CacheStore::new())).fail_point_reads();
        let router = router(Arc::new(Directory::new(Arc::new(faulty), VariantPolicy::cache())));
        let uri = format!("/users/profile/{}", uuid::Uuid::new_v4());
        let (status, body) = send(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }
}
