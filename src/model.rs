//! Estimators behind the delay classifier.
//!
//! Two capabilities: a probabilistic estimator exposing P(delay) and a hard
//! estimator exposing only a label. Both learn from per-class weighted samples.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoder::FeatureVector;
use crate::types::DelayLabel;

#[derive(Debug, Error, PartialEq)]
pub enum SolverError {
    #[error("no training samples")]
    NoSamples,
    #[error("got {features} feature vectors but {labels} labels")]
    LengthMismatch { features: usize, labels: usize },
    #[error("feature vector {index} has {got} slots, expected {expected}")]
    DimensionMismatch { index: usize, expected: usize, got: usize },
}

/// Per-class sample weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    pub negative: f64,
    pub positive: f64,
}

impl Default for ClassWeights {
    fn default() -> Self {
        Self::UNIFORM
    }
}

impl ClassWeights {
    pub const UNIFORM: ClassWeights = ClassWeights { negative: 1.0, positive: 1.0 };

    pub fn of(&self, label: DelayLabel) -> f64 {
        if label.is_delayed() {
            self.positive
        } else {
            self.negative
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverParams {
    pub max_iter: usize,
    pub tol: f64,
    /// L2 penalty on the coefficients (the intercept is never penalised).
    pub l2: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-6,
            l2: 1.0,
        }
    }
}

pub trait Estimator {
    fn fit(
        &mut self,
        x: &[FeatureVector],
        y: &[DelayLabel],
        weights: &ClassWeights,
        params: &SolverParams,
    ) -> Result<(), SolverError>;

    /// Feature width seen at fit time.
    fn dim(&self) -> usize;
}

pub trait ProbabilisticEstimator: Estimator {
    fn predict_proba(&self, x: &FeatureVector) -> f64;
}

pub trait HardEstimator: Estimator {
    fn predict_label(&self, x: &FeatureVector) -> DelayLabel;
}

fn check_training_set(x: &[FeatureVector], y: &[DelayLabel]) -> Result<usize, SolverError> {
    if x.len() != y.len() {
        return Err(SolverError::LengthMismatch {
            features: x.len(),
            labels: y.len(),
        });
    }
    let first = x.first().ok_or(SolverError::NoSamples)?;
    let dim = first.len();
    for (index, v) in x.iter().enumerate() {
        if v.len() != dim {
            return Err(SolverError::DimensionMismatch {
                index,
                expected: dim,
                got: v.len(),
            });
        }
    }
    Ok(dim)
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

// log(1 + e^z) without overflow
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

// ---------- Logistic regression ----------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    #[serde(default)]
    pub iterations: usize,
}

// Active slots of one row, paired with its weight and target.
struct Sample {
    slots: Vec<(usize, f64)>,
    weight: f64,
    target: f64,
}

impl LogisticRegression {
    pub fn from_parameters(coefficients: Vec<f64>, intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
            iterations: 0,
        }
    }

    fn logit(&self, slots: &[(usize, f64)], theta: &[f64]) -> f64 {
        let bias = theta[theta.len() - 1];
        slots.iter().map(|(j, v)| theta[*j] * v).sum::<f64>() + bias
    }

    fn objective(&self, samples: &[Sample], theta: &[f64], l2: f64) -> f64 {
        let dim = theta.len() - 1;
        let penalty = 0.5 * l2 * theta[..dim].iter().map(|w| w * w).sum::<f64>();
        let loss: f64 = samples
            .iter()
            .map(|s| {
                let z = self.logit(&s.slots, theta);
                s.weight * (softplus(z) - s.target * z)
            })
            .sum();
        loss + penalty
    }
}

impl Estimator for LogisticRegression {
    /// Weighted, L2-penalised maximum likelihood via damped Newton steps.
    fn fit(
        &mut self,
        x: &[FeatureVector],
        y: &[DelayLabel],
        weights: &ClassWeights,
        params: &SolverParams,
    ) -> Result<(), SolverError> {
        let dim = check_training_set(x, y)?;
        let n_params = dim + 1;
        let bias = dim;

        let samples: Vec<Sample> = x
            .iter()
            .zip(y)
            .map(|(v, label)| Sample {
                slots: v.iter_f64().enumerate().filter(|(_, val)| *val != 0.0).collect(),
                weight: weights.of(*label),
                target: f64::from(label.get()),
            })
            .collect();
        let total_weight: f64 = samples.iter().map(|s| s.weight).sum::<f64>().max(1.0);

        let mut theta = vec![0.0; n_params];
        let mut iterations = 0;

        for _ in 0..params.max_iter {
            iterations += 1;
            let mut grad = vec![0.0; n_params];
            let mut hess = vec![vec![0.0; n_params]; n_params];

            for s in &samples {
                let p = sigmoid(self.logit(&s.slots, &theta));
                let r = s.weight * (p - s.target);
                let c = s.weight * p * (1.0 - p);
                for (j, vj) in &s.slots {
                    grad[*j] += r * vj;
                    hess[bias][*j] += c * vj;
                    for (k, vk) in &s.slots {
                        hess[*j][*k] += c * vj * vk;
                    }
                }
                grad[bias] += r;
                hess[bias][bias] += c;
            }
            for j in 0..dim {
                grad[j] += params.l2 * theta[j];
                hess[j][j] += params.l2;
                let cross = hess[bias][j];
                hess[j][bias] = cross;
            }
            for (j, row) in hess.iter_mut().enumerate() {
                row[j] += 1e-10;
            }

            let max_grad = grad.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
            if max_grad <= params.tol * total_weight {
                break;
            }

            let Some(step) = solve(hess, grad.clone()) else {
                break;
            };

            // backtracking line search on the penalised objective
            let current = self.objective(&samples, &theta, params.l2);
            let descent: f64 = grad.iter().zip(&step).map(|(g, d)| g * d).sum();
            let mut t = 1.0;
            let mut accepted = false;
            for _ in 0..30 {
                let candidate: Vec<f64> = theta.iter().zip(&step).map(|(th, d)| th - t * d).collect();
                if self.objective(&samples, &candidate, params.l2) <= current - 1e-4 * t * descent {
                    theta = candidate;
                    accepted = true;
                    break;
                }
                t *= 0.5;
            }
            if !accepted {
                break;
            }
        }

        self.intercept = theta[bias];
        theta.truncate(dim);
        self.coefficients = theta;
        self.iterations = iterations;
        Ok(())
    }

    fn dim(&self) -> usize {
        self.coefficients.len()
    }
}

impl ProbabilisticEstimator for LogisticRegression {
    fn predict_proba(&self, x: &FeatureVector) -> f64 {
        let z: f64 = self.coefficients.iter().zip(x.iter_f64()).map(|(w, v)| w * v).sum();
        sigmoid(z + self.intercept)
    }
}

// Gaussian elimination with partial pivoting. None when singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|i, j| a[*i][col].abs().total_cmp(&a[*j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        let pivot_row = a[col].clone();
        let pivot_b = b[col];
        for row in col + 1..n {
            let factor = a[row][col] / pivot_row[col];
            if factor == 0.0 {
                continue;
            }
            for (dst, src) in a[row][col..].iter_mut().zip(&pivot_row[col..]) {
                *dst -= factor * src;
            }
            b[row] -= factor * pivot_b;
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

// ---------- Nearest centroid ----------

/// Label-only estimator: class centroids, nearest one wins.
///
/// Class weights scale the pull of each centroid: a row goes to the class
/// with the smaller `distance / weight`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroid {
    pub dim: usize,
    pub negative: Option<Vec<f64>>,
    pub positive: Option<Vec<f64>>,
    #[serde(default)]
    pub class_weights: ClassWeights,
}

impl NearestCentroid {
    fn centroid(x: &[FeatureVector], y: &[DelayLabel], class: DelayLabel, dim: usize) -> Option<Vec<f64>> {
        let mut sum = vec![0.0; dim];
        let mut count = 0usize;
        for (v, _) in x.iter().zip(y).filter(|(_, l)| **l == class) {
            for (acc, val) in sum.iter_mut().zip(v.iter_f64()) {
                *acc += val;
            }
            count += 1;
        }
        if count > 0 {
            Some(sum.into_iter().map(|s| s / count as f64).collect())
        } else {
            None
        }
    }

    fn distance(centroid: &[f64], x: &FeatureVector) -> f64 {
        centroid.iter().zip(x.iter_f64()).map(|(c, v)| (c - v) * (c - v)).sum()
    }
}

impl Estimator for NearestCentroid {
    fn fit(
        &mut self,
        x: &[FeatureVector],
        y: &[DelayLabel],
        weights: &ClassWeights,
        _params: &SolverParams,
    ) -> Result<(), SolverError> {
        let dim = check_training_set(x, y)?;
        self.dim = dim;
        self.negative = Self::centroid(x, y, DelayLabel::ON_TIME, dim);
        self.positive = Self::centroid(x, y, DelayLabel::DELAYED, dim);
        self.class_weights = *weights;
        Ok(())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

impl HardEstimator for NearestCentroid {
    fn predict_label(&self, x: &FeatureVector) -> DelayLabel {
        match (&self.negative, &self.positive) {
            (Some(neg), Some(pos)) => {
                // d_pos / w_pos < d_neg / w_neg, without dividing by a zero weight
                let w = &self.class_weights;
                DelayLabel::from_bool(Self::distance(pos, x) * w.negative < Self::distance(neg, x) * w.positive)
            }
            (None, Some(_)) => DelayLabel::DELAYED,
            _ => DelayLabel::ON_TIME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fv(slots: &[u8]) -> FeatureVector {
        FeatureVector::new(slots.to_vec())
    }

    fn labels(raw: &[u8]) -> Vec<DelayLabel> {
        raw.iter().map(|l| DelayLabel::try_from(*l).unwrap()).collect()
    }

    // slot 0 is a strong delay signal, slot 1 mostly on-time
    fn separable_ish() -> (Vec<FeatureVector>, Vec<DelayLabel>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            x.push(fv(&[1, 0]));
            y.push(DelayLabel::from_bool(i % 10 != 0));
            x.push(fv(&[0, 1]));
            y.push(DelayLabel::from_bool(i % 10 == 0));
            x.push(fv(&[0, 0]));
            y.push(DelayLabel::from_bool(i % 2 == 0));
        }
        (x, y)
    }

    #[test]
    fn logistic_learns_direction_of_each_slot() {
        let (x, y) = separable_ish();
        let mut lr = LogisticRegression::default();
        lr.fit(&x, &y, &ClassWeights::UNIFORM, &SolverParams::default()).unwrap();
        assert_eq!(lr.dim(), 2);
        assert!(lr.coefficients[0] > 0.0);
        assert!(lr.coefficients[1] < 0.0);
        assert!(lr.predict_proba(&fv(&[1, 0])) > 0.8);
        assert!(lr.predict_proba(&fv(&[0, 1])) < 0.2);
        // baseline is a coin flip
        assert!((lr.predict_proba(&fv(&[0, 0])) - 0.5).abs() < 0.05);
    }

    #[test]
    fn unpenalised_fit_matches_empirical_rate() {
        let x = vec![fv(&[0]); 10];
        let y = labels(&[1, 1, 1, 0, 0, 0, 0, 0, 0, 0]);
        let mut lr = LogisticRegression::default();
        let params = SolverParams { l2: 0.0, ..SolverParams::default() };
        lr.fit(&x, &y, &ClassWeights::UNIFORM, &params).unwrap();
        assert!((lr.predict_proba(&fv(&[0])) - 0.3).abs() < 1e-4);
    }

    #[test]
    fn class_weights_shift_probability() {
        let x = vec![fv(&[0]); 10];
        let y = labels(&[1, 1, 1, 0, 0, 0, 0, 0, 0, 0]);
        let params = SolverParams { l2: 0.0, ..SolverParams::default() };
        let mut lr = LogisticRegression::default();
        // 3 positives at weight 7/3 balance 7 negatives at weight 1
        let weights = ClassWeights { negative: 1.0, positive: 7.0 / 3.0 };
        lr.fit(&x, &y, &weights, &params).unwrap();
        assert!((lr.predict_proba(&fv(&[0])) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn single_class_fit_stays_finite() {
        let x = vec![fv(&[1, 0]), fv(&[0, 1]), fv(&[0, 0])];
        let y = labels(&[1, 1, 1]);
        let mut lr = LogisticRegression::default();
        lr.fit(&x, &y, &ClassWeights::UNIFORM, &SolverParams::default()).unwrap();
        assert!(lr.intercept.is_finite());
        assert!(lr.predict_proba(&fv(&[0, 0])) > 0.9);
    }

    #[test]
    fn bad_training_sets_are_rejected() {
        let mut lr = LogisticRegression::default();
        let params = SolverParams::default();
        assert_eq!(lr.fit(&[], &[], &ClassWeights::UNIFORM, &params), Err(SolverError::NoSamples));
        assert_eq!(
            lr.fit(&[fv(&[1])], &[], &ClassWeights::UNIFORM, &params),
            Err(SolverError::LengthMismatch { features: 1, labels: 0 })
        );
        assert_eq!(
            lr.fit(&[fv(&[1]), fv(&[1, 0])], &labels(&[0, 1]), &ClassWeights::UNIFORM, &params),
            Err(SolverError::DimensionMismatch { index: 1, expected: 1, got: 2 })
        );
    }

    #[test]
    fn centroid_picks_nearest_class() {
        let (x, y) = separable_ish();
        let mut nc = NearestCentroid::default();
        nc.fit(&x, &y, &ClassWeights::UNIFORM, &SolverParams::default()).unwrap();
        assert_eq!(nc.predict_label(&fv(&[1, 0])), DelayLabel::DELAYED);
        assert_eq!(nc.predict_label(&fv(&[0, 1])), DelayLabel::ON_TIME);
    }

    #[test]
    fn centroid_with_one_class_predicts_it() {
        let mut nc = NearestCentroid::default();
        nc.fit(&[fv(&[1]), fv(&[0])], &labels(&[1, 1]), &ClassWeights::UNIFORM, &SolverParams::default())
            .unwrap();
        assert_eq!(nc.predict_label(&fv(&[0])), DelayLabel::DELAYED);
    }

    #[test]
    fn centroid_class_weights_move_the_boundary() {
        let x = vec![fv(&[0, 1]), fv(&[0, 1]), fv(&[1, 0]), fv(&[1, 0])];
        let y = labels(&[0, 0, 1, 1]);
        // equidistant from both centroids
        let query = fv(&[0, 0]);

        let mut plain = NearestCentroid::default();
        plain.fit(&x, &y, &ClassWeights::UNIFORM, &SolverParams::default()).unwrap();
        assert_eq!(plain.predict_label(&query), DelayLabel::ON_TIME);

        let mut favour_delay = NearestCentroid::default();
        let weights = ClassWeights { negative: 0.01, positive: 100.0 };
        favour_delay.fit(&x, &y, &weights, &SolverParams::default()).unwrap();
        assert_eq!(favour_delay.predict_label(&query), DelayLabel::DELAYED);
        // a row sitting on the on-time centroid stays on time
        assert_eq!(favour_delay.predict_label(&fv(&[0, 1])), DelayLabel::ON_TIME);
    }

    #[test]
    fn solve_handles_pivoting() {
        let x = solve(vec![vec![0.0, 1.0], vec![2.0, 0.0]], vec![3.0, 4.0]).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
        assert!(solve(vec![vec![0.0]], vec![1.0]).is_none());
    }
}
