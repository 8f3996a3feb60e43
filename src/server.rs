/// HTTP transport: analysis progress as server-sent events.
///
/// `POST /api/analyse` runs one batch and streams every [`ProgressEvent`] as
/// an SSE `data:` line. Dropping the response (client disconnect) cancels
/// the run; results computed so far are still saved.
use std::convert::Infallible;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::matching::gaps::GapReport;
use crate::matching::{Control, ReviewStatus};
use crate::pipeline::progress::{ProgressEvent, ProgressReporter};
use crate::pipeline::service::{EvidenceService, Upload};

// ── Request bodies ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentBody {
    pub filename: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// Document text; binary formats need a text extractor in front.
    pub content: String,
    #[serde(default)]
    pub evidence_type_hint: Option<String>,
}

fn default_mime_type() -> String {
    "text/plain".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AnalyseRequest {
    pub control: Control,
    pub documents: Vec<DocumentBody>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub status: ReviewStatus,
}

// ── Errors ───────────────────────────────────────────────────────────

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = %e, "Request failed");
        Self(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn analyse(
    State(service): State<EvidenceService>,
    Json(request): Json<AnalyseRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if request.documents.is_empty() {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "at least one document is required".into(),
        ));
    }

    let uploads: Vec<Upload> = request
        .documents
        .into_iter()
        .map(|d| Upload {
            filename: d.filename,
            mime_type: d.mime_type,
            bytes: d.content.into_bytes(),
            evidence_type_hint: d.evidence_type_hint,
        })
        .collect();
    let control = request.control;
    info!(control = %control.id, documents = uploads.len(), "Analysis requested");

    let (reporter, rx) = ProgressReporter::channel();
    let cancel = CancellationToken::new();
    // Held by the response stream: dropping it cancels the batch.
    let guard = cancel.clone().drop_guard();

    tokio::spawn(async move {
        service
            .analyse_batch(&control, &uploads, &reporter, &cancel)
            .await;
    });

    let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse(&event)), (rx, guard)))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &ProgressEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to serialise progress event");
        Event::default().comment("unserialisable event")
    })
}

async fn gaps(
    State(service): State<EvidenceService>,
    Json(control): Json<Control>,
) -> Result<Json<GapReport>, ApiError> {
    Ok(Json(service.gap_report(&control).await?))
}

async fn review(
    State(service): State<EvidenceService>,
    Path(match_id): Path<i64>,
    Json(request): Json<ReviewRequest>,
) -> Result<StatusCode, ApiError> {
    service
        .review(match_id, request.status)
        .await
        .map_err(|e| ApiError(StatusCode::NOT_FOUND, format!("{e:#}")))?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Server ───────────────────────────────────────────────────────────

pub fn router(service: EvidenceService) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/analyse", post(analyse))
        .route("/api/gaps", post(gaps))
        .route("/api/matches/:id/review", post(review))
        .with_state(service)
}

/// Serve on an already bound listener until the future completes.
pub async fn serve_on(
    listener: TcpListener,
    service: EvidenceService,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    info!("Listening on http://{addr}");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}

/// Bind `bind` and serve until Ctrl-C.
pub async fn serve(bind: &str, service: EvidenceService) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    serve_on(listener, service, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
        }
        info!("Shutting down");
    })
    .await
}
