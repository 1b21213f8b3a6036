use crate::{
    app::{AppBackend, AppError, AppLocal},
    reconcile::{ReconcileError, ReconciliationResult},
    tags::StoredTag,
};
use anyhow::{anyhow, Context};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;

#[derive(Clone)]
struct SharedState {
    app: Arc<AppLocal>,
}

pub fn router(app: Arc<AppLocal>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/api/tags", get(tags))
        .route("/api/tags/reconcile", post(reconcile))
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::max(1024 * 1024))
                .layer(
                    tower_http::trace::TraceLayer::new_for_http()
                        .make_span_with(
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                        )
                        .on_response(
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                        ),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

async fn start_app(app: AppLocal, addr: &str) -> anyhow::Result<()> {
    let app = router(Arc::new(app));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(app: AppLocal, addr: &str) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(app, addr).await })
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        log::error!("{:?}", self.0);

        let status = match &self.0 {
            AppError::Reconcile(ReconcileError::EmbeddingUnavailable { .. })
            | AppError::Embedding(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

// This enables using `?` on anything convertible to `AppError` inside handlers.
impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileRequest {
    pub tags: Vec<String>,
}

async fn reconcile(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<ReconcileRequest>,
) -> Result<Json<ReconciliationResult>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();
    let result = tokio::task::spawn_blocking(move || app.reconcile(payload.tags))
        .await
        .map_err(|err| AppError::Other(anyhow!("reconcile task failed: {err}")))??;

    Ok(Json(result))
}

async fn tags(State(state): State<Arc<SharedState>>) -> Result<Json<Vec<StoredTag>>, HttpError> {
    let app = state.app.clone();
    let tags = tokio::task::spawn_blocking(move || app.tags())
        .await
        .map_err(|err| AppError::Other(anyhow!("tags task failed: {err}")))??;

    Ok(Json(tags))
}
