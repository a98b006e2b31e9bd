use serde::{Deserialize, Serialize};
use std::fmt;

// ---------- Domain rows ----------

/// Flight type as carried by the dataset: `I` (international) or `N` (national).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlightType {
    #[serde(rename = "I")]
    International,
    #[serde(rename = "N")]
    National,
}

impl FlightType {
    pub const ALL: [FlightType; 2] = [FlightType::International, FlightType::National];

    pub fn code(self) -> &'static str {
        match self {
            FlightType::International => "I",
            FlightType::National => "N",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "I" => Some(FlightType::International),
            "N" => Some(FlightType::National),
            _ => None,
        }
    }
}

impl fmt::Display for FlightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Calendar month, always within 1..=12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Month(u8);

impl Month {
    pub fn new(value: i64) -> Option<Self> {
        if (1..=12).contains(&value) {
            Some(Month(value as u8))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Month {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Month::new(value).ok_or_else(|| format!("month must be 1..12, got {value}"))
    }
}

impl From<Month> for i64 {
    fn from(m: Month) -> i64 {
        i64::from(m.0)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three categorical attributes the model sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFlightRow {
    pub operator: String,
    pub flight_type: FlightType,
    pub month: Month,
}

impl RawFlightRow {
    pub fn new(operator: impl Into<String>, flight_type: FlightType, month: Month) -> Self {
        Self {
            operator: operator.into(),
            flight_type,
            month,
        }
    }
}

/// Binary delay label: 1 = delayed more than 15 minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DelayLabel(u8);

impl DelayLabel {
    pub const ON_TIME: DelayLabel = DelayLabel(0);
    pub const DELAYED: DelayLabel = DelayLabel(1);

    pub fn from_bool(delayed: bool) -> Self {
        if delayed {
            Self::DELAYED
        } else {
            Self::ON_TIME
        }
    }

    pub fn is_delayed(self) -> bool {
        self.0 == 1
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for DelayLabel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 | 1 => Ok(DelayLabel(value)),
            other => Err(format!("label must be 0 or 1, got {other}")),
        }
    }
}

impl From<DelayLabel> for u8 {
    fn from(l: DelayLabel) -> u8 {
        l.0
    }
}

// ---------- Wire types ----------

// Field names follow the dataset columns the clients already send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightIn {
    #[serde(rename = "OPERA")]
    pub operator: String,
    #[serde(rename = "TIPOVUELO")]
    pub flight_type: String,
    #[serde(rename = "MES", deserialize_with = "month_number")]
    pub month: i64,
}

/// Accepts `3`, `3.0` and `"3"` for a month; `3.5` or `"March"` are refused.
fn month_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Int(i64),
        Float(f64),
        Text(String),
    }

    let integral = |f: f64| {
        if f.is_finite() && f.fract() == 0.0 && f.abs() <= i64::MAX as f64 {
            Ok(f as i64)
        } else {
            Err(D::Error::custom(format!("MES must be a whole number, got {f}")))
        }
    };

    match Loose::deserialize(deserializer)? {
        Loose::Int(n) => Ok(n),
        Loose::Float(f) => integral(f),
        Loose::Text(s) => {
            let t = s.trim();
            match t.parse::<i64>() {
                Ok(n) => Ok(n),
                Err(_) => match t.parse::<f64>() {
                    Ok(f) => integral(f),
                    Err(_) => Err(D::Error::custom(format!("MES must be a number, got {s:?}"))),
                },
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub flights: Vec<FlightIn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predict: Vec<u8>,
}
