//! The serialized model: fitted trees plus everything needed to rebuild the
//! exact feature vectors the trees were fitted on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::ml::features::{FeatureEncoder, FeatureVector};
use crate::ml::trainer::TrainingParams;

pub const SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model artifact not found at {path}; run `train` first or pass --model")]
    NotFound { path: PathBuf },
    #[error("failed to read model artifact {path}: {source}")]
    Unreadable { path: PathBuf, source: io::Error },
    #[error("model artifact {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("model artifact schema v{found} is not supported (expected v{expected})")]
    UnsupportedVersion { found: u8, expected: u8 },
    #[error("refusing to save a model artifact that would not load back: {source}")]
    Invalid { source: serde_json::Error },
    #[error("failed to write model artifact {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Numbers reported at training time. Informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub rows_loaded: usize,
    pub rows_eligible: usize,
    pub train_size: usize,
    pub test_size: usize,
    pub positive_rate: f64,
    pub auc: Option<f64>,
    pub stations: usize,
}

#[derive(Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema_version: u8,
    pub trained_at: DateTime<Utc>,
    pub encoder: FeatureEncoder,
    pub params: TrainingParams,
    pub report: TrainingReport,
    model: GBDT,
}

impl ModelArtifact {
    pub fn new(
        encoder: FeatureEncoder,
        params: TrainingParams,
        report: TrainingReport,
        model: GBDT,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            trained_at: Utc::now(),
            encoder,
            params,
            report,
            model,
        }
    }

    /// Probability of at least one bike for each vector.
    pub fn predict_proba(&self, vectors: &[FeatureVector]) -> Vec<f64> {
        if vectors.is_empty() {
            return Vec::new();
        }
        let data: DataVec = vectors
            .iter()
            .map(|v| Data::new_test_data(v.to_row(), None))
            .collect();

        self.model
            .predict(&data)
            .into_iter()
            .map(|p| f64::from(p).clamp(0.0, 1.0))
            .collect()
    }

    pub fn predict_one(&self, vector: &FeatureVector) -> f64 {
        self.predict_proba(std::slice::from_ref(vector))
            .first()
            .copied()
            .unwrap_or(0.0)
    }

    /// Writes the artifact next to `path` and renames it into place, so a
    /// failed write never clobbers the previous model. The serialized bytes
    /// must parse back before anything touches the disk.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let write_err = |source| ModelError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(write_err)?;
        }

        let json = serde_json::to_vec(self).map_err(|e| write_err(io::Error::other(e)))?;
        serde_json::from_slice::<ModelArtifact>(&json)
            .map_err(|source| ModelError::Invalid { source })?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)?;

        info!(path = %path.display(), "Model artifact saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = fs::read(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ModelError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ModelError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let artifact: ModelArtifact =
            serde_json::from_slice(&bytes).map_err(|source| ModelError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;

        if artifact.schema_version != SCHEMA_VERSION {
            return Err(ModelError::UnsupportedVersion {
                found: artifact.schema_version,
                expected: SCHEMA_VERSION,
            });
        }

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::FEATURE_COUNT;
    use gbdt::config::Config as GbdtConfig;

    /// A model fitted on rows that all carry `target`.
    fn single_label_artifact(target: f32) -> ModelArtifact {
        let encoder = FeatureEncoder::fit(
            chrono_tz::America::Mexico_City,
            ["059"].into_iter(),
            [20].into_iter(),
        );
        let mut cfg = GbdtConfig::new();
        cfg.set_feature_size(FEATURE_COUNT);
        cfg.set_max_depth(2);
        cfg.set_iterations(3);
        cfg.set_loss("LogLikelyhood");
        let mut model = GBDT::new(&cfg);
        let mut data: DataVec = (0..8)
            .map(|h| {
                let vector = encoder.encode_slot(
                    "059",
                    crate::ml::features::TimeSlot::new(h + 6, 2).unwrap(),
                    Some(20),
                );
                Data::new_training_data(vector.to_row(), 1.0, target, None)
            })
            .collect();
        model.fit(&mut data);

        let report = TrainingReport {
            rows_loaded: 8,
            rows_eligible: 8,
            train_size: 8,
            test_size: 0,
            positive_rate: if target > 0.0 { 1.0 } else { 0.0 },
            auc: None,
            stations: 1,
        };
        ModelArtifact::new(encoder, TrainingParams::default(), report, model)
    }

    #[test]
    fn test_unloadable_model_never_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, b"previous model").unwrap();

        let err = single_label_artifact(1.0).save(&path).err().unwrap();

        assert!(matches!(err, ModelError::Invalid { .. }));
        assert_eq!(fs::read(&path).unwrap(), b"previous model");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelArtifact::load(&dir.path().join("absent.json"))
            .err()
            .unwrap();
        assert!(matches!(err, ModelError::NotFound { .. }));
        assert!(err.to_string().contains("run `train` first"));
    }

    #[test]
    fn test_load_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, b"not a model").unwrap();

        let err = ModelArtifact::load(&path).err().unwrap();
        assert!(matches!(err, ModelError::Corrupt { .. }));
    }
}
