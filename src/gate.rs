//! Serving-side category checks.
//!
//! The encoder maps any unseen operator onto the all-zero baseline, which is
//! indistinguishable from the real baseline carrier. Requests are therefore
//! checked against the operators seen in training before they are encoded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::types::{FlightIn, FlightType, Month, RawFlightRow};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Flight #{index}: TIPOVUELO must be one of I, N (got '{value}')")]
    BadFlightType { index: usize, value: String },
    #[error("Flight #{index}: MES must be 1..12 (got {value})")]
    BadMonth { index: usize, value: i64 },
    #[error("Flight #{index}: unknown OPERA '{value}'")]
    UnknownOperator { index: usize, value: String },
}

impl ValidationError {
    pub fn index(&self) -> usize {
        match self {
            ValidationError::BadFlightType { index, .. }
            | ValidationError::BadMonth { index, .. }
            | ValidationError::UnknownOperator { index, .. } => *index,
        }
    }

    /// Stable name of the violated rule, for clients.
    pub fn rule(&self) -> &'static str {
        match self {
            ValidationError::BadFlightType { .. } => "bad_flight_type",
            ValidationError::BadMonth { .. } => "bad_month",
            ValidationError::UnknownOperator { .. } => "unknown_operator",
        }
    }
}

/// Operators observed during training. Empty means gating is off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnownOperatorSet(BTreeSet<String>);

impl KnownOperatorSet {
    pub fn from_rows(rows: &[RawFlightRow]) -> Self {
        Self(rows.iter().map(|r| r.operator.clone()).collect())
    }

    pub fn contains(&self, operator: &str) -> bool {
        self.0.contains(operator)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for KnownOperatorSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CategoryGate {
    known: KnownOperatorSet,
}

impl CategoryGate {
    pub fn new(known: KnownOperatorSet) -> Self {
        Self { known }
    }

    pub fn known_operators(&self) -> &KnownOperatorSet {
        &self.known
    }

    /// Validate one request row, turning it into a typed row.
    pub fn check(&self, index: usize, flight: &FlightIn) -> Result<RawFlightRow, ValidationError> {
        let flight_type = FlightType::from_code(&flight.flight_type).ok_or_else(|| ValidationError::BadFlightType {
            index,
            value: flight.flight_type.clone(),
        })?;
        let month = Month::new(flight.month).ok_or(ValidationError::BadMonth {
            index,
            value: flight.month,
        })?;
        if !self.known.is_empty() && !self.known.contains(&flight.operator) {
            return Err(ValidationError::UnknownOperator {
                index,
                value: flight.operator.clone(),
            });
        }
        Ok(RawFlightRow::new(flight.operator.clone(), flight_type, month))
    }

    /// All-or-nothing: the first bad row rejects the batch.
    pub fn check_batch(&self, flights: &[FlightIn]) -> Result<Vec<RawFlightRow>, ValidationError> {
        flights.iter().enumerate().map(|(i, f)| self.check(i, f)).collect()
    }
}
