//! Offline training: CSV in, artifact out.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::artifact::TrainedArtifact;
use crate::classifier::{DecisionThreshold, DelayClassifier};
use crate::config::TrainConfig;
use crate::encoder::{FeatureEncoder, FeatureSchema};
use crate::gate::KnownOperatorSet;
use crate::labels::{LabelComputer, Timestamp, TrainingRow};
use crate::metrics::ConfusionMatrix;
use crate::types::{FlightType, Month, RawFlightRow};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },
    #[error("classifier fitted without a model")]
    NotFitted,
}

// Only the columns the model needs; the rest of the dataset is ignored.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "Fecha-I")]
    scheduled: String,
    #[serde(rename = "Fecha-O")]
    actual: String,
    #[serde(rename = "OPERA")]
    operator: String,
    #[serde(rename = "TIPOVUELO")]
    flight_type: String,
    #[serde(rename = "MES")]
    month: i64,
}

impl CsvRecord {
    fn into_row(self, row: usize) -> Result<TrainingRow, TrainingError> {
        let invalid = |reason: String| TrainingError::InvalidRow { row, reason };
        let flight_type = FlightType::from_code(self.flight_type.trim())
            .ok_or_else(|| invalid(format!("TIPOVUELO must be I or N, got '{}'", self.flight_type)))?;
        let month = Month::new(self.month).ok_or_else(|| invalid(format!("MES must be 1..12, got {}", self.month)))?;
        let scheduled: Timestamp = self.scheduled.parse().map_err(|e| invalid(format!("Fecha-I: {e}")))?;
        let actual: Timestamp = self.actual.parse().map_err(|e| invalid(format!("Fecha-O: {e}")))?;
        Ok(TrainingRow {
            flight: RawFlightRow::new(self.operator, flight_type, month),
            scheduled,
            actual,
        })
    }
}

pub fn read_rows<R: std::io::Read>(reader: R) -> Result<Vec<TrainingRow>, TrainingError> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    rdr.deserialize::<CsvRecord>()
        .enumerate()
        .map(|(i, rec)| rec?.into_row(i + 1))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub rows: usize,
    pub train_rows: usize,
    pub holdout_rows: usize,
    pub delayed_fraction: f64,
    pub columns: usize,
    pub operators: usize,
    pub train_metrics: ConfusionMatrix,
    pub holdout_metrics: Option<ConfusionMatrix>,
}

/// Fit a complete artifact from labelled-by-timestamp rows.
pub fn train(rows: &[TrainingRow], config: &TrainConfig) -> Result<(TrainedArtifact, TrainReport)> {
    ensure!(
        (0.0..1.0).contains(&config.holdout),
        "holdout fraction must be in [0, 1), got {}",
        config.holdout
    );
    let labels = LabelComputer::compute(rows)?;
    let flights: Vec<RawFlightRow> = rows.iter().map(|r| r.flight.clone()).collect();

    let holdout_rows = (rows.len() as f64 * config.holdout).floor() as usize;
    let split = rows.len() - holdout_rows;
    let (train_flights, test_flights) = flights.split_at(split);
    let (train_labels, test_labels) = labels.split_at(split);

    let mut schema = FeatureSchema::fit(train_flights);
    if !config.columns.is_empty() {
        schema = schema.restrict(&config.columns)?;
    }
    let known_operators = KnownOperatorSet::from_rows(train_flights);

    let threshold = DecisionThreshold::new(config.threshold)?;
    let mut classifier = DelayClassifier::new(config.estimator, threshold, config.fit);
    let x_train = FeatureEncoder::encode(&schema, train_flights);
    classifier.fit(&x_train, train_labels)?;

    let train_metrics = ConfusionMatrix::from_predictions(train_labels, &classifier.predict(&x_train)?);
    let holdout_metrics = if test_flights.is_empty() {
        None
    } else {
        let x_test = FeatureEncoder::encode(&schema, test_flights);
        Some(ConfusionMatrix::from_predictions(test_labels, &classifier.predict(&x_test)?))
    };

    let report = TrainReport {
        rows: rows.len(),
        train_rows: split,
        holdout_rows,
        delayed_fraction: labels.iter().filter(|l| l.is_delayed()).count() as f64 / rows.len().max(1) as f64,
        columns: schema.len(),
        operators: known_operators.len(),
        train_metrics,
        holdout_metrics,
    };

    let fitted = classifier.fitted().ok_or(TrainingError::NotFitted)?;
    let artifact = TrainedArtifact::new(config.model_version.clone(), schema, fitted, known_operators);
    Ok((artifact, report))
}

/// Read the dataset, fit, persist. The training entry point.
pub fn run(config: &TrainConfig) -> Result<TrainReport> {
    let data: &Path = &config.data;
    ensure!(data.exists(), "training data not found: {}", data.display());

    let file = std::fs::File::open(data).with_context(|| format!("failed to open {}", data.display()))?;
    let rows = read_rows(file).with_context(|| format!("failed to read {}", data.display()))?;
    tracing::info!(rows = rows.len(), path = %data.display(), "read training data");

    let (artifact, report) = train(&rows, config)?;
    tracing::info!(
        columns = report.columns,
        operators = report.operators,
        delayed_fraction = report.delayed_fraction,
        "fitted {} classifier",
        config.estimator
    );
    tracing::info!("train: {}", report.train_metrics);
    if let Some(holdout) = &report.holdout_metrics {
        tracing::info!("holdout: {holdout}");
    }

    artifact
        .save(&config.output)
        .with_context(|| format!("failed to save model to {}", config.output.display()))?;
    tracing::info!(path = %config.output.display(), "saved model artifact");
    Ok(report)
}
