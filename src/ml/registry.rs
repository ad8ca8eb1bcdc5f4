use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

use super::model::{Learner, Predictor};

/// Semantic version for model artifacts
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModelVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn initial() -> Self {
        Self::new(1, 0, 0)
    }

    pub fn bump_patch(&self) -> Self {
        Self::new(self.major, self.minor, self.patch + 1)
    }
}

impl FromStr for ModelVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(anyhow!("Invalid version format: {}", s));
        }

        Ok(Self {
            major: parts[0].parse()?,
            minor: parts[1].parse()?,
            patch: parts[2].parse()?,
        })
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Versioned model artifacts on disk: `<dir>/model_<version>.json`
pub struct ModelRegistry {
    models_dir: PathBuf,
}

impl ModelRegistry {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self { models_dir: models_dir.into() }
    }

    fn model_path(&self, version: &ModelVersion) -> PathBuf {
        self.models_dir.join(format!("model_{}.json", version))
    }

    /// Every artifact in the directory, oldest version first
    pub fn list_versions(&self) -> Result<Vec<ModelVersion>> {
        if !self.models_dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions: Vec<ModelVersion> = fs::read_dir(&self.models_dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let version = name.strip_prefix("model_")?.strip_suffix(".json")?;
                ModelVersion::from_str(version).ok()
            })
            .collect();
        versions.sort();
        Ok(versions)
    }

    pub fn latest_version(&self) -> Result<Option<ModelVersion>> {
        Ok(self.list_versions()?.pop())
    }

    pub fn next_version(&self) -> Result<ModelVersion> {
        match self.latest_version()? {
            Some(latest) => Ok(latest.bump_patch()),
            None => Ok(ModelVersion::initial()),
        }
    }

    /// Persist a trained model under the next free version.
    /// Returns the artifact path used as the model reference.
    pub fn save(&self, model: &dyn Predictor) -> Result<String> {
        fs::create_dir_all(&self.models_dir)?;
        let version = self.next_version()?;
        let path = self.model_path(&version);

        fs::write(&path, model.to_json()?)?;
        info!("Saved {} model v{} to {}", model.name(), version, path.display());

        Ok(path.to_string_lossy().to_string())
    }

    /// Restore the newest artifact, if any
    pub fn load_latest(&self, learner: &dyn Learner) -> Result<Option<(ModelVersion, Box<dyn Predictor>)>> {
        let Some(version) = self.latest_version()? else {
            return Ok(None);
        };
        let path = self.model_path(&version);
        let json = fs::read_to_string(&path)?;
        match learner.load(&json) {
            Ok(model) => {
                info!("Loaded model v{} from {}", version, path.display());
                Ok(Some((version, model)))
            }
            Err(e) => {
                warn!("Model artifact {} is unreadable: {}", path.display(), e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::LogisticLearner;
    use ndarray::array;

    #[test]
    fn test_model_version_parsing() {
        let v = ModelVersion::from_str("1.2.3").unwrap();
        assert_eq!(v, ModelVersion::new(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
        assert_eq!(v.bump_patch(), ModelVersion::new(1, 2, 4));
        assert!(ModelVersion::from_str("1.2").is_err());
    }

    #[test]
    fn test_versions_sort_numerically() {
        assert!(ModelVersion::new(1, 0, 10) > ModelVersion::new(1, 0, 9));
    }

    #[test]
    fn test_save_bumps_version_and_loads_latest() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path().join("models"));
        let learner = LogisticLearner::default();
        assert!(registry.load_latest(&learner).unwrap().is_none());

        let model = learner.train(&array![[0.0], [1.0]], &array![0.0, 1.0]).unwrap();
        let first = registry.save(model.as_ref()).unwrap();
        let second = registry.save(model.as_ref()).unwrap();

        assert!(first.ends_with("model_1.0.0.json"));
        assert!(second.ends_with("model_1.0.1.json"));

        let (version, _) = registry.load_latest(&learner).unwrap().unwrap();
        assert_eq!(version, ModelVersion::new(1, 0, 1));
    }
}
