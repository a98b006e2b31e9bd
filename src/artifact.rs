use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::classifier::FittedClassifier;
use crate::encoder::{EncoderError, FeatureSchema};
use crate::gate::KnownOperatorSet;

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found at {0}")]
    Missing(PathBuf),
    #[error("failed to access artifact at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt artifact at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize artifact for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported artifact format version {0}")]
    UnsupportedVersion(u32),
    #[error(transparent)]
    Schema(#[from] EncoderError),
    #[error("schema has {schema} columns but the model was fitted on {model}")]
    SchemaMismatch { schema: usize, model: usize },
}

/// Everything serving needs from one training run. Never mutated after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedArtifact {
    pub format_version: u32,
    pub model_version: String,
    pub trained_at: DateTime<Utc>,
    pub schema: FeatureSchema,
    pub classifier: FittedClassifier,
    pub known_operators: KnownOperatorSet,
}

impl TrainedArtifact {
    pub fn new(
        model_version: impl Into<String>,
        schema: FeatureSchema,
        classifier: FittedClassifier,
        known_operators: KnownOperatorSet,
    ) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            model_version: model_version.into(),
            trained_at: Utc::now(),
            schema,
            classifier,
            known_operators,
        }
    }

    /// Write as JSON through a temp file, so readers never see a partial artifact.
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let io_err = |source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|source| ArtifactError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("tmp");
        let written = fs::write(&tmp, json).and_then(|()| fs::rename(&tmp, path));
        if let Err(e) = written {
            // best effort
            let _ = fs::remove_file(&tmp);
            return Err(io_err(e));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let bytes = fs::read(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ArtifactError::Missing(path.to_path_buf()),
            _ => ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        let artifact: TrainedArtifact = serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<(), ArtifactError> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion(self.format_version));
        }
        self.schema.check_version()?;
        let model = self.classifier.model.dim();
        if model != self.schema.len() {
            return Err(ArtifactError::SchemaMismatch {
                schema: self.schema.len(),
                model,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{DecisionThreshold, FittedModel};
    use crate::model::LogisticRegression;
    use crate::types::{FlightType, Month, RawFlightRow};

    fn artifact() -> TrainedArtifact {
        let rows = vec![
            RawFlightRow::new("Copa Air", FlightType::International, Month::new(1).unwrap()),
            RawFlightRow::new("Sky Airline", FlightType::National, Month::new(7).unwrap()),
        ];
        let schema = FeatureSchema::fit(&rows);
        let classifier = FittedClassifier {
            threshold: DecisionThreshold::default(),
            model: FittedModel::Probabilistic(LogisticRegression::from_parameters(vec![0.5, -0.25, 1.0], -0.1)),
        };
        TrainedArtifact::new("test", schema, classifier, KnownOperatorSet::from_rows(&rows))
    }

    #[test]
    fn save_then_load_returns_same_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/model.json");
        let a = artifact();
        a.save(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(TrainedArtifact::load(&path).unwrap(), a);
    }

    #[test]
    fn failed_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // the target is a directory, so the final rename cannot replace it
        let path = dir.path().join("model.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"x").unwrap();

        let err = artifact().save(&path).unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }), "{err}");
        assert!(!path.with_extension("tmp").exists());
        assert!(path.join("keep").exists());
    }

    #[test]
    fn missing_file_is_reported_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrainedArtifact::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ArtifactError::Missing(_)));
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, b"\x80not json").unwrap();
        assert!(matches!(TrainedArtifact::load(&path), Err(ArtifactError::Corrupt { .. })));
    }

    #[test]
    fn model_width_must_match_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut a = artifact();
        a.classifier.model = FittedModel::Probabilistic(LogisticRegression::from_parameters(vec![0.5], 0.0));
        a.save(&path).unwrap();
        assert!(matches!(
            TrainedArtifact::load(&path),
            Err(ArtifactError::SchemaMismatch { schema: 3, model: 1 })
        ));
    }

    #[test]
    fn future_format_versions_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut a = artifact();
        a.format_version = 99;
        a.save(&path).unwrap();
        assert!(matches!(TrainedArtifact::load(&path), Err(ArtifactError::UnsupportedVersion(99))));
    }
}
