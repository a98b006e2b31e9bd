use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use crate::classifier::{EstimatorKind, FitParams, DEFAULT_DECISION_THRESHOLD};

pub const DEFAULT_MODEL_PATH: &str = "models/delay_model.json";
pub const DEFAULT_DATA_PATH: &str = "data/data.csv";

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub model_path: PathBuf,
    /// Reported by `/info`; falls back to the artifact's own version.
    pub model_version: Option<String>,
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Defer the artifact load to the first request.
    pub lazy_load: bool,
    pub log_predictions: bool,
}

impl ServeConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            model_version: None,
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            lazy_load: false,
            log_predictions: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub data: PathBuf,
    pub output: PathBuf,
    pub estimator: EstimatorKind,
    pub threshold: f64,
    pub fit: FitParams,
    /// Fraction of trailing rows held out for evaluation.
    pub holdout: f64,
    /// Restrict the schema to these dummy columns; empty keeps all.
    pub columns: Vec<String>,
    pub model_version: String,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data: PathBuf::from(DEFAULT_DATA_PATH),
            output: PathBuf::from(DEFAULT_MODEL_PATH),
            estimator: EstimatorKind::default(),
            threshold: DEFAULT_DECISION_THRESHOLD,
            fit: FitParams::default(),
            holdout: 0.0,
            columns: Vec::new(),
            model_version: "unknown".to_string(),
        }
    }
}
