use serde::Serialize;
use std::fmt;

use crate::types::DelayLabel;

/// Binary confusion matrix; "positive" is the delay class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl ConfusionMatrix {
    pub fn from_predictions(truth: &[DelayLabel], predicted: &[DelayLabel]) -> Self {
        let mut m = Self::default();
        for (t, p) in truth.iter().zip(predicted) {
            match (t.is_delayed(), p.is_delayed()) {
                (true, true) => m.true_positive += 1,
                (false, true) => m.false_positive += 1,
                (false, false) => m.true_negative += 1,
                (true, false) => m.false_negative += 1,
            }
        }
        m
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} acc={:.3} precision={:.3} recall={:.3} f1={:.3} [tp={} fp={} tn={} fn={}]",
            self.total(),
            self.accuracy(),
            self.precision(),
            self.recall(),
            self.f1(),
            self.true_positive,
            self.false_positive,
            self.true_negative,
            self.false_negative
        )
    }
}
