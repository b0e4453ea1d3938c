use std::sync::Arc;

use axum::extract::multipart::{Multipart, MultipartError};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::{CacheManager, EuclideanMatcher, MatchResult, UserId};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::engine::{EngineError, EngineHandle};

/// Multipart field carrying the uploaded image.
const IMAGE_FIELD: &str = "image";

/// Shared state for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheManager>,
    pub engine: EngineHandle,
    pub tolerance: f32,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No image provided")]
    MissingImage,
    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Invalid image file: {0}")]
    InvalidImage(String),
    #[error("Recognition failed: {0}")]
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidImage(msg) => ApiError::InvalidImage(msg),
            other => ApiError::Engine(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MissingImage | ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            // 413 when the upload exceeds the body limit, 400 for malformed bodies.
            ApiError::Multipart(err) => err.status(),
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "recognize request failed");
        } else {
            tracing::debug!(error = %self, "rejected recognize request");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// One entry of the `/recognize` response.
#[derive(Debug, Serialize)]
pub struct FaceResult {
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub distance: Option<f32>,
    pub encoding: Vec<f32>,
}

impl From<MatchResult> for FaceResult {
    fn from(result: MatchResult) -> Self {
        Self {
            user_id: result.user_id,
            email: result.email,
            distance: result.distance,
            encoding: result.embedding.values,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    pub results: Vec<FaceResult>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/recognize", post(handler_recognize))
        .route("/health", get(handler_health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handler_recognize(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let mut image = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            image = Some(field.bytes().await?);
            break;
        }
    }
    let image = image.ok_or(ApiError::MissingImage)?;

    let probes = state.engine.encode(image.to_vec()).await?;

    // One snapshot per request: every face is matched against the same data
    // even if a refresh lands while we iterate.
    let snapshot = state.cache.get_snapshot();
    let results = snapshot
        .match_all(&EuclideanMatcher, &probes, state.tolerance)
        .into_iter()
        .map(FaceResult::from)
        .collect::<Vec<_>>();

    tracing::info!(
        faces = results.len(),
        matched = results.iter().filter(|r| r.user_id.is_some()).count(),
        identities = snapshot.len(),
        "recognize request served"
    );

    Ok(Json(RecognizeResponse { results }))
}

async fn handler_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.cache.get_snapshot();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "generation": state.cache.generation(),
        "identities": snapshot.len(),
        "loaded_at": snapshot.loaded_at(),
        "tolerance": state.tolerance,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::engine::tests::{png_bytes, FixedEncoder};
    use axum::body::Body;
    use image::RgbImage;
    use rollcall_core::{EncodeError, FaceEncoder};
    use axum::http::{header, Method, Request};
    use http_body_util::BodyExt;
    use rollcall_core::{Embedding, EmbeddingStore, KnownIdentity};
    use serde_json::Value;
    use tower::ServiceExt; // for `oneshot`

    const BOUNDARY: &str = "rollcall-test-boundary";

    fn alice() -> KnownIdentity {
        KnownIdentity {
            user_id: UserId::from("alice-id"),
            email: "alice@example.com".into(),
            embedding: Embedding::new(vec![0.0, 0.0, 0.0]),
        }
    }

    fn app(store: EmbeddingStore, faces: Vec<Embedding>) -> Router {
        app_with_limit(store, faces, 1024 * 1024)
    }

    fn app_with_limit(store: EmbeddingStore, faces: Vec<Embedding>, max_upload_bytes: usize) -> Router {
        let state = AppState {
            cache: Arc::new(CacheManager::new(store)),
            engine: spawn_engine(Box::new(FixedEncoder(faces)), 4).unwrap(),
            tolerance: 0.6,
        };
        router(state, max_upload_bytes)
    }

    fn bob() -> KnownIdentity {
        KnownIdentity {
            user_id: UserId::from(2),
            email: "bob@example.com".into(),
            embedding: Embedding::new(vec![0.0, 0.0, 0.0]),
        }
    }

    /// Installs a new snapshot while the image is being encoded, the way a
    /// refresh can land in the middle of a request.
    struct RefreshingEncoder {
        cache: Arc<CacheManager>,
        faces: Vec<Embedding>,
    }

    impl FaceEncoder for RefreshingEncoder {
        fn dimension(&self) -> usize {
            3
        }

        fn encode(&mut self, _image: &RgbImage) -> Result<Vec<Embedding>, EncodeError> {
            self.cache.install_snapshot(EmbeddingStore::new(vec![bob()]));
            Ok(self.faces.clone())
        }
    }

    fn multipart_body(field: &str, content: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn recognize_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/recognize")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_two_faces_one_known_one_unknown() {
        let known = Embedding::new(vec![0.3, 0.0, 0.0]);
        let stranger = Embedding::new(vec![5.0, 5.0, 5.0]);
        let app = app(EmbeddingStore::new(vec![alice()]), vec![known, stranger]);

        let (status, body) = send(app, recognize_request(multipart_body("image", &png_bytes()))).await;
        assert_eq!(status, StatusCode::OK);

        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);

        assert_eq!(results[0]["user_id"], "alice-id");
        assert_eq!(results[0]["email"], "alice@example.com");
        assert!((results[0]["distance"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        assert_eq!(results[0]["encoding"].as_array().unwrap().len(), 3);

        assert!(results[1]["user_id"].is_null());
        assert!(results[1]["email"].is_null());
        assert!(results[1]["distance"].is_null());
        assert_eq!(results[1]["encoding"], serde_json::json!([5.0, 5.0, 5.0]));
    }

    #[tokio::test]
    async fn test_no_faces_is_empty_success() {
        let app = app(EmbeddingStore::new(vec![alice()]), vec![]);
        let (status, body) = send(app, recognize_request(multipart_body("image", &png_bytes()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "results": [] }));
    }

    #[tokio::test]
    async fn test_empty_cache_returns_unknowns() {
        let app = app(EmbeddingStore::empty(), vec![Embedding::new(vec![0.0, 0.0, 0.0])]);
        let (status, body) = send(app, recognize_request(multipart_body("image", &png_bytes()))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["results"][0]["user_id"].is_null());
        assert_eq!(body["results"][0]["encoding"], serde_json::json!([0.0, 0.0, 0.0]));
    }

    #[tokio::test]
    async fn test_missing_image_field_is_bad_request() {
        let app = app(EmbeddingStore::empty(), vec![]);
        let (status, body) = send(app, recognize_request(multipart_body("photo", &png_bytes()))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image provided");
    }

    #[tokio::test]
    async fn test_undecodable_image_is_bad_request() {
        let app = app(EmbeddingStore::empty(), vec![]);
        let (status, body) = send(app, recognize_request(multipart_body("image", b"not an image"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid image file"));
    }

    #[tokio::test]
    async fn test_refresh_during_request_matches_all_faces_against_one_snapshot() {
        let cache = Arc::new(CacheManager::new(EmbeddingStore::new(vec![alice()])));
        let encoder = RefreshingEncoder {
            cache: cache.clone(),
            faces: vec![Embedding::new(vec![0.1, 0.0, 0.0]), Embedding::new(vec![0.0, 0.2, 0.0])],
        };
        let state = AppState {
            cache: cache.clone(),
            engine: spawn_engine(Box::new(encoder), 4).unwrap(),
            tolerance: 0.6,
        };

        let (status, body) = send(
            router(state, 1024 * 1024),
            recognize_request(multipart_body("image", &png_bytes())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache.generation(), 1);

        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        for face in results {
            assert_eq!(face["user_id"], 2);
            assert_eq!(face["email"], "bob@example.com");
        }
    }

    #[tokio::test]
    async fn test_oversized_upload_is_payload_too_large() {
        let app = app_with_limit(EmbeddingStore::empty(), vec![], 256);
        let (status, body) = send(app, recognize_request(multipart_body("image", &[0u8; 4096]))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid multipart body"));
    }

    #[tokio::test]
    async fn test_health_reports_snapshot() {
        let app = app(EmbeddingStore::new(vec![alice()]), vec![]);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["identities"], 1);
        assert_eq!(body["generation"], 0);
    }
}
