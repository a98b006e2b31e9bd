//! One-hot encoding of flight rows against a frozen column schema.
//!
//! The schema is fitted once from the training rows and persisted with the
//! model. Serving never re-derives it: a slot always means the same category,
//! whatever else happens to be in the batch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::types::{FlightType, Month, RawFlightRow};

pub const SCHEMA_VERSION: u32 = 1;

const OPERATOR_PREFIX: &str = "OPERA_";
const FLIGHT_TYPE_PREFIX: &str = "TIPOVUELO_";
const MONTH_PREFIX: &str = "MES_";

#[derive(Debug, Error, PartialEq)]
pub enum EncoderError {
    #[error("unknown feature column '{0}'")]
    UnknownColumn(String),
    #[error("malformed feature column name '{0}'")]
    MalformedColumn(String),
    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u32),
}

// ---------- Columns ----------

/// One dummy column: a single category of one of the three groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FeatureColumn {
    Operator(String),
    FlightType(FlightType),
    Month(Month),
}

impl FeatureColumn {
    pub fn name(&self) -> String {
        match self {
            FeatureColumn::Operator(op) => format!("{OPERATOR_PREFIX}{op}"),
            FeatureColumn::FlightType(t) => format!("{FLIGHT_TYPE_PREFIX}{}", t.code()),
            FeatureColumn::Month(m) => format!("{MONTH_PREFIX}{m}"),
        }
    }

    pub fn matches(&self, row: &RawFlightRow) -> bool {
        match self {
            FeatureColumn::Operator(op) => *op == row.operator,
            FeatureColumn::FlightType(t) => *t == row.flight_type,
            FeatureColumn::Month(m) => *m == row.month,
        }
    }

    pub fn parse(name: &str) -> Result<Self, EncoderError> {
        let malformed = || EncoderError::MalformedColumn(name.to_string());
        if let Some(op) = name.strip_prefix(OPERATOR_PREFIX) {
            return Ok(FeatureColumn::Operator(op.to_string()));
        }
        if let Some(code) = name.strip_prefix(FLIGHT_TYPE_PREFIX) {
            return FlightType::from_code(code).map(FeatureColumn::FlightType).ok_or_else(malformed);
        }
        if let Some(m) = name.strip_prefix(MONTH_PREFIX) {
            return m
                .parse::<i64>()
                .ok()
                .and_then(Month::new)
                .map(FeatureColumn::Month)
                .ok_or_else(malformed);
        }
        Err(malformed())
    }
}

impl fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl TryFrom<String> for FeatureColumn {
    type Error = EncoderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FeatureColumn::parse(&value)
    }
}

impl From<FeatureColumn> for String {
    fn from(c: FeatureColumn) -> String {
        c.name()
    }
}

// ---------- Schema ----------

/// Categories that were dropped as the implicit all-zero baseline of each group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baselines {
    pub operator: Option<String>,
    pub flight_type: Option<FlightType>,
    pub month: Option<Month>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub columns: Vec<FeatureColumn>,
    pub baselines: Baselines,
}

impl FeatureSchema {
    /// Schema with no columns; used by the unfitted fallback.
    pub fn empty() -> Self {
        Self {
            version: SCHEMA_VERSION,
            columns: Vec::new(),
            baselines: Baselines::default(),
        }
    }

    /// Derive the dummy columns from training rows.
    ///
    /// Groups are laid out operator, flight type, month. Inside a group the
    /// distinct values are sorted and the smallest becomes the baseline.
    pub fn fit(rows: &[RawFlightRow]) -> Self {
        let operators: BTreeSet<&str> = rows.iter().map(|r| r.operator.as_str()).collect();
        let flight_types: BTreeSet<FlightType> = rows.iter().map(|r| r.flight_type).collect();
        let months: BTreeSet<Month> = rows.iter().map(|r| r.month).collect();

        let mut columns = Vec::with_capacity(operators.len() + flight_types.len() + months.len());
        columns.extend(operators.iter().skip(1).map(|op| FeatureColumn::Operator(op.to_string())));
        columns.extend(flight_types.iter().skip(1).copied().map(FeatureColumn::FlightType));
        columns.extend(months.iter().skip(1).copied().map(FeatureColumn::Month));

        Self {
            version: SCHEMA_VERSION,
            columns,
            baselines: Baselines {
                operator: operators.first().map(|s| s.to_string()),
                flight_type: flight_types.first().copied(),
                month: months.first().copied(),
            },
        }
    }

    /// Keep only the named columns, preserving schema order.
    pub fn restrict(&self, names: &[String]) -> Result<Self, EncoderError> {
        let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        let present: BTreeSet<String> = self.columns.iter().map(FeatureColumn::name).collect();
        if let Some(missing) = wanted.iter().find(|n| !present.contains(**n)) {
            return Err(EncoderError::UnknownColumn(missing.to_string()));
        }
        Ok(Self {
            version: self.version,
            columns: self
                .columns
                .iter()
                .filter(|c| wanted.contains(c.name().as_str()))
                .cloned()
                .collect(),
            baselines: self.baselines.clone(),
        })
    }

    pub fn check_version(&self) -> Result<(), EncoderError> {
        if self.version == SCHEMA_VERSION {
            Ok(())
        } else {
            Err(EncoderError::UnsupportedVersion(self.version))
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(FeatureColumn::name).collect()
    }
}

// ---------- Vectors ----------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureVector(Vec<u8>);

impl FeatureVector {
    pub fn new(slots: Vec<u8>) -> Self {
        Self(slots)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count_nonzero(&self) -> usize {
        self.0.iter().filter(|x| **x != 0).count()
    }

    /// Slots as floats, for the solvers.
    pub fn iter_f64(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().map(|x| f64::from(*x))
    }
}

pub struct FeatureEncoder;

impl FeatureEncoder {
    /// One vector per row, shaped exactly like `schema`.
    ///
    /// Categories outside the schema (including each group's baseline) encode
    /// as zero in their group.
    pub fn encode(schema: &FeatureSchema, rows: &[RawFlightRow]) -> Vec<FeatureVector> {
        rows.iter().map(|row| Self::encode_row(schema, row)).collect()
    }

    pub fn encode_row(schema: &FeatureSchema, row: &RawFlightRow) -> FeatureVector {
        FeatureVector(schema.columns.iter().map(|c| u8::from(c.matches(row))).collect())
    }
}
