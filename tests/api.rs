use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use flight_delay::classifier::{DecisionThreshold, FittedClassifier, FittedModel};
use flight_delay::model::LogisticRegression;
use flight_delay::server::{router, AppState};
use flight_delay::{FeatureSchema, FlightType, KnownOperatorSet, ModelHandle, Month, RawFlightRow, ServingModel, TrainedArtifact};

fn artifact() -> TrainedArtifact {
    let rows = vec![
        RawFlightRow::new("Aerolineas Argentinas", FlightType::National, Month::new(3).unwrap()),
        RawFlightRow::new("Copa Air", FlightType::International, Month::new(7).unwrap()),
    ];
    let schema = FeatureSchema::fit(&rows);
    // columns: OPERA_Copa Air, TIPOVUELO_N, MES_7
    let model = LogisticRegression::from_parameters(vec![4.0, 0.0, 0.0], -2.0);
    TrainedArtifact::new(
        "v1",
        schema,
        FittedClassifier {
            threshold: DecisionThreshold::default(),
            model: FittedModel::Probabilistic(model),
        },
        KnownOperatorSet::from_rows(&rows),
    )
}

fn app_with(model: ServingModel) -> Router {
    let handle = Arc::new(ModelHandle::with_model("unused.json", model));
    router(AppState::new(handle))
}

fn fallback_app() -> Router {
    app_with(ServingModel::fallback())
}

async fn post_json(app: Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let req = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();
    send(app, req).await
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

// -- POST /predict ---------------------------------------------------------

#[tokio::test]
async fn test_should_get_predict() {
    let data = json!({"flights": [{"OPERA": "Aerolineas Argentinas", "TIPOVUELO": "N", "MES": 3}]});
    let (status, body) = post_json(fallback_app(), "/predict", &data).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"predict": [0]}));
}

#[tokio::test]
async fn test_should_fail_on_month_13() {
    let data = json!({"flights": [{"OPERA": "Aerolineas Argentinas", "TIPOVUELO": "N", "MES": 13}]});
    let (status, body) = post_json(fallback_app(), "/predict", &data).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["rule"], "bad_month");
    assert_eq!(body["index"], 0);
}

#[tokio::test]
async fn test_should_fail_on_month_0() {
    let data = json!({"flights": [{"OPERA": "Copa Air", "TIPOVUELO": "I", "MES": 0}]});
    let (status, _) = post_json(app_with(ServingModel::from_artifact(artifact())), "/predict", &data).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_should_fail_on_unknown_flight_type() {
    let data = json!({"flights": [{"OPERA": "Aerolineas Argentinas", "TIPOVUELO": "O", "MES": 13}]});
    let (status, body) = post_json(fallback_app(), "/predict", &data).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["rule"], "bad_flight_type");
}

#[tokio::test]
async fn test_should_fail_on_unknown_operator_only_when_vocabulary_known() {
    let data = json!({"flights": [{"OPERA": "Unknown Air", "TIPOVUELO": "I", "MES": 5}]});

    let (status, body) = post_json(app_with(ServingModel::from_artifact(artifact())), "/predict", &data).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["rule"], "unknown_operator");
    assert_eq!(body["detail"], "Flight #0: unknown OPERA 'Unknown Air'");

    let (status, body) = post_json(fallback_app(), "/predict", &data).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"predict": [0]}));
}

#[tokio::test]
async fn test_bad_row_aborts_whole_batch_with_its_index() {
    let data = json!({"flights": [
        {"OPERA": "Copa Air", "TIPOVUELO": "I", "MES": 1},
        {"OPERA": "Copa Air", "TIPOVUELO": "N", "MES": 14},
    ]});
    let (status, body) = post_json(fallback_app(), "/predict", &data).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["index"], 1);
    assert!(body.get("predict").is_none());
}

#[tokio::test]
async fn test_trained_model_predicts_in_request_order() {
    let data = json!({"flights": [
        {"OPERA": "Copa Air", "TIPOVUELO": "I", "MES": 7},
        {"OPERA": "Aerolineas Argentinas", "TIPOVUELO": "N", "MES": 3},
        {"OPERA": "Copa Air", "TIPOVUELO": "N", "MES": 12},
    ]});
    let (status, body) = post_json(app_with(ServingModel::from_artifact(artifact())), "/predict", &data).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"predict": [1, 0, 1]}));
}

#[tokio::test]
async fn test_month_given_as_float_or_string_is_coerced() {
    let data = json!({"flights": [
        {"OPERA": "Copa Air", "TIPOVUELO": "I", "MES": 7.0},
        {"OPERA": "Aerolineas Argentinas", "TIPOVUELO": "N", "MES": "3"},
    ]});
    let (status, body) = post_json(app_with(ServingModel::from_artifact(artifact())), "/predict", &data).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"predict": [1, 0]}));

    let data = json!({"flights": [{"OPERA": "Copa Air", "TIPOVUELO": "I", "MES": 7.5}]});
    let (status, _) = post_json(fallback_app(), "/predict", &data).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_prediction_logging_does_not_change_the_response() {
    let handle = Arc::new(ModelHandle::with_model("unused.json", ServingModel::from_artifact(artifact())));
    let mut state = AppState::new(handle);
    state.log_predictions = true;
    let data = json!({"flights": [{"OPERA": "Copa Air", "TIPOVUELO": "N", "MES": 7}]});
    let (status, body) = post_json(router(state), "/predict", &data).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"predict": [1]}));
}

#[tokio::test]
async fn test_empty_batch_returns_empty_predictions() {
    let (status, body) = post_json(fallback_app(), "/predict", &json!({"flights": []})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"predict": []}));
}

#[tokio::test]
async fn test_body_without_flights_list_is_rejected() {
    for body in [json!({}), json!({"flights": "Copa Air"}), json!([1, 2])] {
        let (status, resp) = post_json(fallback_app(), "/predict", &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(resp["detail"], "Body must include a 'flights' list.");
    }
}

#[tokio::test]
async fn test_malformed_rows_and_json_are_rejected() {
    let data = json!({"flights": [{"OPERA": "Copa Air", "TIPOVUELO": "I"}]});
    let (status, _) = post_json(fallback_app(), "/predict", &data).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::post("/predict")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(fallback_app(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// -- GET /health, /info ------------------------------------------------------

#[tokio::test]
async fn test_health() {
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = send(fallback_app(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "OK"}));
}

#[tokio::test]
async fn test_info_reports_operator_count() {
    let req = Request::get("/info").body(Body::empty()).unwrap();
    let (_, body) = send(fallback_app(), req).await;
    assert_eq!(body["operators_count"], 0);
    assert_eq!(body["model_version"], "unknown");

    let req = Request::get("/info").body(Body::empty()).unwrap();
    let (_, body) = send(app_with(ServingModel::from_artifact(artifact())), req).await;
    assert_eq!(body["operators_count"], 2);
    assert_eq!(body["model_version"], "v1");
}

// -- lazy load and POST /reload ------------------------------------------------

#[tokio::test]
async fn test_lazy_load_then_reload_swaps_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("delay_model.json");
    let handle = Arc::new(ModelHandle::new(&path));
    let app = router(AppState::new(Arc::clone(&handle)));

    // nothing on disk yet: fallback accepts any operator
    let data = json!({"flights": [{"OPERA": "Unknown Air", "TIPOVUELO": "I", "MES": 5}]});
    let (status, _) = post_json(app.clone(), "/predict", &data).await;
    assert_eq!(status, StatusCode::OK);

    artifact().save(&path).unwrap();
    let req = Request::post("/reload").body(Body::empty()).unwrap();
    let (status, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["operators_count"], 2);
    assert_eq!(body["fallback"], false);

    let (status, _) = post_json(app, "/predict", &data).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
