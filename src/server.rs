use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::ServeConfig;
use crate::gate::ValidationError;
use crate::state::{ModelHandle, PredictError};
use crate::types::{PredictRequest, PredictResponse};

// ---------- Errors ----------

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Validation(ValidationError),
    Internal(String),
}

impl From<PredictError> for ApiError {
    fn from(e: PredictError) -> Self {
        match e {
            PredictError::Validation(v) => ApiError::Validation(v),
            // the fallback classifier always predicts, so this is a broken invariant
            PredictError::Classifier(c) => ApiError::Internal(c.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response(),
            ApiError::Validation(v) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": v.to_string(), "index": v.index(), "rule": v.rule() })),
            )
                .into_response(),
            ApiError::Internal(detail) => {
                tracing::error!("internal error: {detail}");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": detail }))).into_response()
            }
        }
    }
}

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub models: Arc<ModelHandle>,
    pub model_version: Option<String>,
    pub log_predictions: bool,
}

impl AppState {
    pub fn new(models: Arc<ModelHandle>) -> Self {
        Self {
            models,
            model_version: None,
            log_predictions: false,
        }
    }
}

// ---------- Handlers ----------

async fn health() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

async fn info(State(state): State<AppState>) -> Json<Value> {
    let model = state.models.get();
    let version = state
        .model_version
        .clone()
        .or_else(|| model.model_version.clone())
        .unwrap_or_else(|| "unknown".to_string());
    Json(json!({
        "status": "OK",
        "model_version": version,
        "operators_count": model.operators_count(),
    }))
}

async fn predict(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(payload) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if !payload.get("flights").is_some_and(Value::is_array) {
        return Err(ApiError::BadRequest("Body must include a 'flights' list.".to_string()));
    }
    let req: PredictRequest = serde_json::from_value(payload).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let model = state.models.get();
    let scored = model.score(&req.flights)?;

    // Debug signal so we can confirm we're not encoding all-zeros
    if state.log_predictions {
        tracing::info!(
            "predict batch={} in_dim={} nonzero={} delayed={} fallback={} version={:?}",
            scored.labels.len(),
            model.schema().len(),
            scored.nonzero(),
            scored.delayed(),
            model.is_fallback(),
            model.model_version
        );
    }

    Ok(Json(PredictResponse {
        predict: scored.labels.into_iter().map(u8::from).collect(),
    }))
}

async fn reload(State(state): State<AppState>) -> Json<Value> {
    let model = state.models.reload();
    Json(json!({
        "status": "OK",
        "fallback": model.is_fallback(),
        "operators_count": model.operators_count(),
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/predict", post(predict))
        .route("/reload", post(reload))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {e}");
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
    tracing::info!("shutdown signal received");
}

pub async fn serve(config: ServeConfig) -> anyhow::Result<()> {
    let models = Arc::new(ModelHandle::new(&config.model_path));
    if config.lazy_load {
        tracing::info!(path = %config.model_path.display(), "model will load on first request");
    } else {
        let model = models.reload();
        tracing::info!(
            fallback = model.is_fallback(),
            columns = model.schema().len(),
            "model ready; feat_list[{}]: {:?}",
            model.schema().len(),
            model.schema().names()
        );
    }

    let state = AppState {
        models: Arc::clone(&models),
        model_version: config.model_version.clone(),
        log_predictions: config.log_predictions,
    };
    let app = router(state);

    let addr = config.socket_addr();
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    models.clear();
    Ok(())
}
