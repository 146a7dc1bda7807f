use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::coordinator::{JobCoordinator, ResultFormat, ResultKind};
use crate::error::ProcessorError;

/// Multipart framing on top of the raw file bytes.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<JobCoordinator>,
}

#[derive(Deserialize)]
struct CodeSubmission {
    code: String,
}

#[derive(Deserialize)]
struct ResultsQuery {
    output_format: Option<String>,
}

#[derive(Serialize)]
struct JobAccepted {
    job_id: String,
    status: String,
    message: &'static str,
}

/// An error response with a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn detail(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "detail": detail.into() }),
        }
    }

    fn job_not_found() -> Self {
        Self::detail(StatusCode::NOT_FOUND, "Job not found")
    }
}

impl From<ProcessorError> for ApiError {
    fn from(err: ProcessorError) -> Self {
        match &err {
            ProcessorError::JobNotFound(_) => Self::job_not_found(),
            ProcessorError::NotReady(status) => Self {
                status: StatusCode::BAD_REQUEST,
                body: json!({
                    "status": status,
                    "message": "Results not available yet",
                }),
            },
            ProcessorError::NoResults => Self::detail(StatusCode::NOT_FOUND, err.to_string()),
            ProcessorError::InvalidUpload(msg) => {
                Self::detail(StatusCode::BAD_REQUEST, msg.clone())
            }
            ProcessorError::CodeRejected(_) | ProcessorError::MissingInput(_) => {
                Self::detail(StatusCode::BAD_REQUEST, err.to_string())
            }
            ProcessorError::InvalidState { .. } | ProcessorError::InputAlreadyAttached(_) => {
                Self::detail(StatusCode::CONFLICT, err.to_string())
            }
            ProcessorError::RegistryFull => {
                Self::detail(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ProcessorError::DuplicateJob(_)
            | ProcessorError::Io(_)
            | ProcessorError::Internal(_) => {
                tracing::error!(error = %err, "Request failed");
                Self::detail(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Routes of the public API.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.coordinator.limits().max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/upload", post(upload_handler))
        .route("/submit_code/{job_id}", post(submit_code_handler))
        .route("/status/{job_id}", get(status_handler))
        .route("/results/{job_id}", get(results_handler))
        .route("/cleanup/{job_id}", delete(cleanup_handler))
        .route("/template", get(template_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind API server");
        e
    })?;

    tracing::info!(addr = %addr, "Starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

fn parse_job_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::job_not_found())
}

async fn upload_handler(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> ApiResult<Json<JobAccepted>> {
    let to_api_error = |err| multipart_error(&state, err);
    while let Some(field) = multipart.next_field().await.map_err(to_api_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let contents = field.bytes().await.map_err(to_api_error)?;

        let job_id = state.coordinator.upload(&filename, &contents).await?;
        return Ok(Json(JobAccepted {
            job_id: job_id.to_string(),
            status: "uploaded".to_string(),
            message: "File uploaded successfully",
        }));
    }

    Err(ApiError::detail(StatusCode::BAD_REQUEST, "No file selected"))
}

/// A body cut off by the request limit is reported like any other oversized
/// upload.
fn multipart_error(state: &ApiState, err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::detail(
            StatusCode::BAD_REQUEST,
            state.coordinator.limits().too_large_message(),
        );
    }
    ApiError::detail(err.status(), err.body_text())
}

async fn submit_code_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Json(payload): Json<CodeSubmission>,
) -> ApiResult<Json<JobAccepted>> {
    let job_id = parse_job_id(&job_id)?;
    let record = state.coordinator.submit_code(&job_id, &payload.code).await?;

    Ok(Json(JobAccepted {
        job_id: record.id.to_string(),
        status: record.status.to_string(),
        message: "Code submitted and processing started",
    }))
}

async fn status_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(state.coordinator.get_status(&job_id)?))
}

async fn results_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> ApiResult<Response> {
    let job_id = parse_job_id(&job_id)?;
    let format = query
        .output_format
        .as_deref()
        .map(ResultFormat::from_hint)
        .unwrap_or_default();

    let file = state.coordinator.get_result(&job_id, format).await?;
    let bytes = tokio::fs::read(&file.path)
        .await
        .map_err(ProcessorError::from)?;

    if file.kind == ResultKind::Json {
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            ProcessorError::Internal(format!("Result file is not valid JSON: {}", e))
        })?;
        return Ok(Json(value).into_response());
    }

    let disposition = format!("attachment; filename=\"{}\"", file.download_name);
    Ok((
        [
            (header::CONTENT_TYPE, file.kind.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn cleanup_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job_id = parse_job_id(&job_id)?;
    state.coordinator.delete_job(&job_id).await?;
    Ok(Json(json!({
        "message": format!("Job {} cleaned up successfully", job_id),
    })))
}

async fn template_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({ "template": state.coordinator.get_template() }))
}
