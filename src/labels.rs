//! Training-time label derivation.
//!
//! A flight is labelled delayed when it operated more than
//! [`DELAY_THRESHOLD_MINUTES`] after its scheduled time. Both timestamps must
//! agree on whether they carry a UTC offset; mixing the two is an error rather
//! than a guess.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use std::{fmt, str::FromStr};
use thiserror::Error;

use crate::types::{DelayLabel, RawFlightRow};

pub const DELAY_THRESHOLD_MINUTES: f64 = 15.0;

#[derive(Debug, Error, PartialEq)]
pub enum LabelError {
    #[error("row {index}: cannot subtract an offset-aware timestamp from a naive one")]
    MixedTimezones { index: usize },
    #[error("unparseable timestamp '{0}'")]
    Unparseable(String),
}

/// A timestamp exactly as precise as its source text: with or without an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Naive(NaiveDateTime),
    Offset(DateTime<FixedOffset>),
}

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

impl Timestamp {
    /// Signed minutes from `self` to `later`. `None` for a naive/aware pair.
    pub fn minutes_until(&self, later: &Timestamp) -> Option<f64> {
        let delta = match (self, later) {
            (Timestamp::Naive(a), Timestamp::Naive(b)) => b.signed_duration_since(*a),
            (Timestamp::Offset(a), Timestamp::Offset(b)) => b.signed_duration_since(*a),
            _ => return None,
        };
        Some(delta.num_milliseconds() as f64 / 60_000.0)
    }
}

impl FromStr for Timestamp {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Timestamp::Offset(dt));
        }
        for fmt in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
                return Ok(Timestamp::Offset(dt));
            }
        }
        for fmt in NAIVE_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(Timestamp::Naive(dt));
            }
        }
        Err(LabelError::Unparseable(s.to_string()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Naive(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            Timestamp::Offset(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

/// A historical row: categorical attributes plus scheduled/actual times.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub flight: RawFlightRow,
    pub scheduled: Timestamp,
    pub actual: Timestamp,
}

pub struct LabelComputer;

impl LabelComputer {
    /// One label per row, in order. Fails on the first naive/aware mismatch.
    pub fn compute(rows: &[TrainingRow]) -> Result<Vec<DelayLabel>, LabelError> {
        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                Self::label(&row.scheduled, &row.actual).ok_or(LabelError::MixedTimezones { index })
            })
            .collect()
    }

    /// `None` when the pair cannot be compared.
    pub fn label(scheduled: &Timestamp, actual: &Timestamp) -> Option<DelayLabel> {
        let mins = scheduled.minutes_until(actual)?;
        Some(DelayLabel::from_bool(mins > DELAY_THRESHOLD_MINUTES))
    }
}
