use anyhow::Result;
use clap::{builder::FalseyValueParser, Args, Parser, Subcommand};
use std::{net::IpAddr, path::PathBuf};

use flight_delay::classifier::{ClassWeighting, EstimatorKind, FitParams};
use flight_delay::config::{ServeConfig, TrainConfig, DEFAULT_DATA_PATH, DEFAULT_MODEL_PATH};
use flight_delay::model::SolverParams;
use flight_delay::{server, training};

#[derive(Parser, Debug)]
#[command(name = "flight-delay", version, about = "Train and serve the flight delay classifier.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fit the classifier on historical flights and persist the artifact
    Train(TrainArgs),
    /// Serve predictions over HTTP
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Training CSV (needs Fecha-I, Fecha-O, OPERA, TIPOVUELO, MES)
    #[arg(long, default_value = DEFAULT_DATA_PATH)]
    pub data: PathBuf,

    /// Where to save the model artifact
    #[arg(long, default_value = DEFAULT_MODEL_PATH)]
    pub output: PathBuf,

    /// P(delay) at or above which a flight is predicted delayed
    #[arg(long, default_value_t = 0.60)]
    pub threshold: f64,

    /// logistic (probabilistic) or centroid (label only)
    #[arg(long, default_value = "logistic")]
    pub estimator: EstimatorKind,

    /// auto, none, or explicit "<negative>,<positive>" weights
    #[arg(long)]
    pub class_weight: Option<ClassWeighting>,

    #[arg(long, default_value_t = 100)]
    pub max_iter: usize,

    /// L2 penalty on coefficients
    #[arg(long, default_value_t = 1.0)]
    pub l2: f64,

    #[arg(long, default_value_t = 1e-6)]
    pub tol: f64,

    /// Fraction of trailing rows held out for evaluation
    #[arg(long, default_value_t = 0.0)]
    pub holdout: f64,

    /// Keep only this dummy column (repeatable), e.g. --column "MES_7"
    #[arg(long = "column")]
    pub columns: Vec<String>,

    #[arg(long, env = "MODEL_VERSION", default_value = "unknown")]
    pub model_version: String,
}

impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            data: a.data,
            output: a.output,
            estimator: a.estimator,
            threshold: a.threshold,
            fit: FitParams {
                class_weight: a.class_weight,
                solver: SolverParams {
                    max_iter: a.max_iter,
                    tol: a.tol,
                    l2: a.l2,
                },
            },
            holdout: a.holdout,
            columns: a.columns,
            model_version: a.model_version,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    /// Overrides the version recorded in the artifact on /info
    #[arg(long, env = "MODEL_VERSION")]
    pub model_version: Option<String>,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Load the artifact on the first request instead of at startup
    #[arg(long, env = "LAZY_LOAD", value_parser = FalseyValueParser::new())]
    pub lazy_load: bool,

    /// Log a summary line per predict batch
    #[arg(long, env = "LOG_PRED", value_parser = FalseyValueParser::new())]
    pub log_predictions: bool,
}

impl From<ServeArgs> for ServeConfig {
    fn from(a: ServeArgs) -> Self {
        ServeConfig {
            model_path: a.model_path,
            model_version: a.model_version,
            bind_addr: a.bind_addr,
            port: a.port,
            lazy_load: a.lazy_load,
            log_predictions: a.log_predictions,
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => {
                let config = TrainConfig::from(args);
                // CPU-bound; keep it off the async workers
                let report = tokio::task::spawn_blocking(move || training::run(&config)).await??;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(())
            }
            Commands::Serve(args) => server::serve(args.into()).await,
        }
    }
}
