//! Flight delay prediction: label derivation, one-hot encoding against a
//! frozen schema, a weighted classifier with a 0.60 decision threshold, and
//! the HTTP service that gates and scores incoming flights.

pub mod artifact;
pub mod classifier;
pub mod config;
pub mod encoder;
pub mod gate;
pub mod labels;
pub mod metrics;
pub mod model;
pub mod server;
pub mod state;
pub mod training;
pub mod types;

pub use artifact::{ArtifactError, TrainedArtifact};
pub use classifier::{ClassifierError, DecisionThreshold, DelayClassifier};
pub use encoder::{FeatureEncoder, FeatureSchema, FeatureVector};
pub use gate::{CategoryGate, KnownOperatorSet, ValidationError};
pub use labels::{LabelComputer, Timestamp, TrainingRow};
pub use state::{ModelHandle, ServingModel};
pub use types::{DelayLabel, FlightIn, FlightType, Month, RawFlightRow};
