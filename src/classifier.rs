//! The delay classifier: class weighting, fit/predict contract and the
//! decision threshold.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

use crate::encoder::FeatureVector;
use crate::model::{
    ClassWeights, Estimator, HardEstimator, LogisticRegression, NearestCentroid, ProbabilisticEstimator,
    SolverError, SolverParams,
};
use crate::types::DelayLabel;

pub const DEFAULT_DECISION_THRESHOLD: f64 = 0.60;

#[derive(Debug, Error, PartialEq)]
pub enum ClassifierError {
    #[error("cannot fit on an empty training set")]
    EmptyTrainingSet,
    #[error("model not trained or loaded")]
    ModelNotTrained,
    #[error("decision threshold must lie in [0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("feature vector {index} has {got} slots, model expects {expected}")]
    DimensionMismatch { index: usize, expected: usize, got: usize },
    #[error(transparent)]
    Solver(#[from] SolverError),
}

// ---------- Threshold ----------

/// Probability cutoff for the delay class; inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct DecisionThreshold(f64);

impl DecisionThreshold {
    pub fn new(value: f64) -> Result<Self, ClassifierError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ClassifierError::InvalidThreshold(value))
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }

    pub fn classify(self, p_delay: f64) -> DelayLabel {
        DelayLabel::from_bool(p_delay >= self.0)
    }
}

impl Default for DecisionThreshold {
    fn default() -> Self {
        Self(DEFAULT_DECISION_THRESHOLD)
    }
}

impl TryFrom<f64> for DecisionThreshold {
    type Error = ClassifierError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DecisionThreshold> for f64 {
    fn from(t: DecisionThreshold) -> f64 {
        t.0
    }
}

// ---------- Class weighting ----------

/// Weights that favour the minority delay class.
///
/// Positive class: `2 * n0 / n`; negative class: `n1 / n`. `None` when either
/// class is missing, in which case training runs unweighted.
pub fn balanced_weights(labels: &[DelayLabel]) -> Option<ClassWeights> {
    let n = labels.len();
    let n1 = labels.iter().filter(|l| l.is_delayed()).count();
    let n0 = n - n1;
    if n0 == 0 || n1 == 0 {
        return None;
    }
    let n = n as f64;
    Some(ClassWeights {
        negative: n1 as f64 / n,
        positive: 2.0 * (n0 as f64 / n),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum ClassWeighting {
    /// Derived from the label distribution.
    #[default]
    Auto,
    Unweighted,
    Explicit(ClassWeights),
}

impl ClassWeighting {
    pub fn resolve(&self, labels: &[DelayLabel]) -> ClassWeights {
        match self {
            ClassWeighting::Auto => balanced_weights(labels).unwrap_or(ClassWeights::UNIFORM),
            ClassWeighting::Unweighted => ClassWeights::UNIFORM,
            ClassWeighting::Explicit(w) => *w,
        }
    }
}

impl FromStr for ClassWeighting {
    type Err = String;

    /// `auto`, `none`, or `<negative>,<positive>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "auto" => Ok(ClassWeighting::Auto),
            "none" => Ok(ClassWeighting::Unweighted),
            pair => {
                let (neg, pos) = pair
                    .split_once(',')
                    .ok_or_else(|| format!("expected auto, none or <neg>,<pos>; got '{pair}'"))?;
                let parse = |v: &str| -> Result<f64, String> {
                    let w = v.trim().parse::<f64>().map_err(|e| format!("bad weight '{v}': {e}"))?;
                    if w.is_finite() && w >= 0.0 {
                        Ok(w)
                    } else {
                        Err(format!("weight must be finite and non-negative, got '{}'", v.trim()))
                    }
                };
                Ok(ClassWeighting::Explicit(ClassWeights {
                    negative: parse(neg)?,
                    positive: parse(pos)?,
                }))
            }
        }
    }
}

/// Caller-supplied training parameters. A set `class_weight` replaces the
/// weights computed from the labels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FitParams {
    pub class_weight: Option<ClassWeighting>,
    pub solver: SolverParams,
}

// ---------- Estimator choice ----------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EstimatorKind {
    #[default]
    Logistic,
    Centroid,
}

impl FromStr for EstimatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logistic" => Ok(EstimatorKind::Logistic),
            "centroid" => Ok(EstimatorKind::Centroid),
            other => Err(format!("unknown estimator '{other}' (expected logistic or centroid)")),
        }
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimatorKind::Logistic => f.write_str("logistic"),
            EstimatorKind::Centroid => f.write_str("centroid"),
        }
    }
}

/// A fitted estimator, tagged by the capability it offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedModel {
    Probabilistic(LogisticRegression),
    Hard(NearestCentroid),
}

impl FittedModel {
    pub fn dim(&self) -> usize {
        match self {
            FittedModel::Probabilistic(m) => m.dim(),
            FittedModel::Hard(m) => m.dim(),
        }
    }
}

/// Persistable form of a fitted classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedClassifier {
    pub threshold: DecisionThreshold,
    pub model: FittedModel,
}

// ---------- Classifier ----------

#[derive(Debug, Clone, PartialEq)]
enum ClassifierState {
    Untrained,
    /// No artifact: every prediction is "no delay".
    Fallback,
    Fitted(FittedModel),
}

#[derive(Debug, Clone)]
pub struct DelayClassifier {
    kind: EstimatorKind,
    threshold: DecisionThreshold,
    params: FitParams,
    state: ClassifierState,
}

impl Default for DelayClassifier {
    fn default() -> Self {
        Self::new(EstimatorKind::default(), DecisionThreshold::default(), FitParams::default())
    }
}

impl DelayClassifier {
    pub fn new(kind: EstimatorKind, threshold: DecisionThreshold, params: FitParams) -> Self {
        Self {
            kind,
            threshold,
            params,
            state: ClassifierState::Untrained,
        }
    }

    /// Classifier that predicts 0 for everything and never fails.
    pub fn unfitted_fallback() -> Self {
        Self {
            state: ClassifierState::Fallback,
            ..Self::default()
        }
    }

    pub fn from_fitted(fitted: FittedClassifier) -> Self {
        let kind = match fitted.model {
            FittedModel::Probabilistic(_) => EstimatorKind::Logistic,
            FittedModel::Hard(_) => EstimatorKind::Centroid,
        };
        Self {
            kind,
            threshold: fitted.threshold,
            params: FitParams::default(),
            state: ClassifierState::Fitted(fitted.model),
        }
    }

    pub fn threshold(&self) -> DecisionThreshold {
        self.threshold
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self.state, ClassifierState::Fitted(_))
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.state, ClassifierState::Fallback)
    }

    pub fn fitted(&self) -> Option<FittedClassifier> {
        match &self.state {
            ClassifierState::Fitted(model) => Some(FittedClassifier {
                threshold: self.threshold,
                model: model.clone(),
            }),
            _ => None,
        }
    }

    /// Fit on encoded rows, replacing any previous state.
    pub fn fit(&mut self, features: &[FeatureVector], labels: &[DelayLabel]) -> Result<&mut Self, ClassifierError> {
        if labels.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        let weights = self.params.class_weight.unwrap_or_default().resolve(labels);
        tracing::debug!(
            negative = weights.negative,
            positive = weights.positive,
            estimator = %self.kind,
            "fitting delay classifier"
        );

        let model = match self.kind {
            EstimatorKind::Logistic => {
                let mut m = LogisticRegression::default();
                m.fit(features, labels, &weights, &self.params.solver)?;
                FittedModel::Probabilistic(m)
            }
            EstimatorKind::Centroid => {
                let mut m = NearestCentroid::default();
                m.fit(features, labels, &weights, &self.params.solver)?;
                FittedModel::Hard(m)
            }
        };
        self.state = ClassifierState::Fitted(model);
        Ok(self)
    }

    pub fn predict(&self, features: &[FeatureVector]) -> Result<Vec<DelayLabel>, ClassifierError> {
        let model = match &self.state {
            ClassifierState::Untrained => return Err(ClassifierError::ModelNotTrained),
            ClassifierState::Fallback => return Ok(vec![DelayLabel::ON_TIME; features.len()]),
            ClassifierState::Fitted(model) => model,
        };
        check_dims(model.dim(), features)?;

        Ok(match model {
            FittedModel::Probabilistic(m) => features
                .iter()
                .map(|x| self.threshold.classify(m.predict_proba(x)))
                .collect(),
            FittedModel::Hard(m) => features.iter().map(|x| m.predict_label(x)).collect(),
        })
    }

    /// P(delay) per row, or `None` for label-only models and the fallback.
    pub fn predict_proba(&self, features: &[FeatureVector]) -> Result<Option<Vec<f64>>, ClassifierError> {
        match &self.state {
            ClassifierState::Untrained => Err(ClassifierError::ModelNotTrained),
            ClassifierState::Fallback | ClassifierState::Fitted(FittedModel::Hard(_)) => Ok(None),
            ClassifierState::Fitted(FittedModel::Probabilistic(m)) => {
                check_dims(m.dim(), features)?;
                Ok(Some(features.iter().map(|x| m.predict_proba(x)).collect()))
            }
        }
    }
}

fn check_dims(expected: usize, features: &[FeatureVector]) -> Result<(), ClassifierError> {
    match features.iter().position(|x| x.len() != expected) {
        Some(index) => Err(ClassifierError::DimensionMismatch {
            index,
            expected,
            got: features[index].len(),
        }),
        None => Ok(()),
    }
}
