//! Process-wide serving state.
//!
//! The loaded model is immutable once built. Loading happens outside the lock;
//! only the pointer swap is guarded, so readers never see a half-built model.

use parking_lot::RwLock;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

use crate::artifact::{ArtifactError, TrainedArtifact};
use crate::classifier::{ClassifierError, DelayClassifier};
use crate::encoder::{FeatureEncoder, FeatureSchema, FeatureVector};
use crate::gate::{CategoryGate, ValidationError};
use crate::types::{DelayLabel, FlightIn};

#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

/// Gate, schema and classifier from one artifact (or the fallback).
#[derive(Debug)]
pub struct ServingModel {
    pub model_version: Option<String>,
    schema: FeatureSchema,
    gate: CategoryGate,
    classifier: DelayClassifier,
}

impl ServingModel {
    /// Predicts "no delay" for every valid row and accepts any operator.
    pub fn fallback() -> Self {
        Self {
            model_version: None,
            schema: FeatureSchema::empty(),
            gate: CategoryGate::default(),
            classifier: DelayClassifier::unfitted_fallback(),
        }
    }

    pub fn from_artifact(artifact: TrainedArtifact) -> Self {
        Self {
            model_version: Some(artifact.model_version),
            schema: artifact.schema,
            gate: CategoryGate::new(artifact.known_operators),
            classifier: DelayClassifier::from_fitted(artifact.classifier),
        }
    }

    pub fn operators_count(&self) -> usize {
        self.gate.known_operators().len()
    }

    pub fn is_fallback(&self) -> bool {
        self.classifier.is_fallback()
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Gate, encode, classify. One label per flight, in request order.
    pub fn predict(&self, flights: &[FlightIn]) -> Result<Vec<DelayLabel>, PredictError> {
        Ok(self.score(flights)?.labels)
    }

    /// Like `predict`, but keeps the encoded vectors alongside the labels.
    pub fn score(&self, flights: &[FlightIn]) -> Result<ScoredBatch, PredictError> {
        let features = self.encode(flights)?;
        let labels = self.classifier.predict(&features)?;
        Ok(ScoredBatch { features, labels })
    }

    pub fn encode(&self, flights: &[FlightIn]) -> Result<Vec<FeatureVector>, ValidationError> {
        let rows = self.gate.check_batch(flights)?;
        Ok(FeatureEncoder::encode(&self.schema, &rows))
    }
}

pub struct ScoredBatch {
    pub features: Vec<FeatureVector>,
    pub labels: Vec<DelayLabel>,
}

impl ScoredBatch {
    /// Non-zero feature slots across the whole batch.
    pub fn nonzero(&self) -> usize {
        self.features.iter().map(FeatureVector::count_nonzero).sum()
    }

    pub fn delayed(&self) -> usize {
        self.labels.iter().filter(|l| l.is_delayed()).count()
    }
}

fn load_or_fallback(path: &Path) -> ServingModel {
    match TrainedArtifact::load(path) {
        Ok(artifact) => {
            tracing::info!(
                path = %path.display(),
                version = %artifact.model_version,
                columns = artifact.schema.len(),
                operators = artifact.known_operators.len(),
                "loaded model artifact"
            );
            ServingModel::from_artifact(artifact)
        }
        Err(ArtifactError::Missing(_)) => {
            tracing::warn!(path = %path.display(), "no model artifact; using unfitted fallback");
            ServingModel::fallback()
        }
        Err(e) => {
            tracing::warn!("model load failed: {e}. Using unfitted fallback");
            ServingModel::fallback()
        }
    }
}

pub struct ModelHandle {
    path: PathBuf,
    current: RwLock<Option<Arc<ServingModel>>>,
}

impl ModelHandle {
    /// Handle with nothing loaded yet; the first `get` loads lazily.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(None),
        }
    }

    /// Handle pre-populated with a model, e.g. one built in memory.
    pub fn with_model(path: impl Into<PathBuf>, model: ServingModel) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Some(Arc::new(model))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Current model, loading it on first use.
    pub fn get(&self) -> Arc<ServingModel> {
        if let Some(model) = self.current.read().as_ref() {
            return Arc::clone(model);
        }
        tracing::info!("model not in state yet, initializing");
        let loaded = Arc::new(load_or_fallback(&self.path));
        // a concurrent first request may have won; keep whichever landed first
        let mut slot = self.current.write();
        Arc::clone(slot.get_or_insert(loaded))
    }

    /// Re-read the artifact and swap it in wholesale.
    pub fn reload(&self) -> Arc<ServingModel> {
        let loaded = Arc::new(load_or_fallback(&self.path));
        *self.current.write() = Some(Arc::clone(&loaded));
        loaded
    }

    /// Drop the current model; in-flight requests keep their own `Arc`.
    pub fn clear(&self) {
        self.current.write().take();
    }
}
