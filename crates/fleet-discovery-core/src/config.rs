//! Configuration for discovery runs and fleet baselining.
//!
//! Loaded in order:
//! 1. `config/default.toml`
//! 2. `config/{FLEET_DISCOVERY_ENV}.toml`
//! 3. Environment variables with the `FLEET_DISCOVERY__` prefix
//!    (e.g. `FLEET_DISCOVERY__CLUSTERING__MIN_CLUSTER_SIZE=8`)

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, DiscoveryResult};
use crate::hdbscan::ClusterSelectionMethod;
use crate::space::EmbeddingSpace;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub preprocessing: PreprocessConfig,
    pub clustering: ClusteringConfig,
    pub scoring: ScoringConfig,
    pub baseline: BaselineConfig,
    pub logging: LoggingConfig,
}

/// Vector preprocessing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Columns with a standard deviation below this are dropped.
    pub variance_epsilon: f32,
    /// Fraction of variance the kept principal components must explain.
    pub explained_variance: f32,
    /// QR iterations before the eigendecomposition is declared non-convergent.
    /// 0 leaves it unbounded.
    pub max_eigen_iterations: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            variance_epsilon: 1e-6,
            explained_variance: 0.95,
            max_eigen_iterations: 0,
        }
    }
}

/// Density clustering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub min_cluster_size: usize,
    /// Defaults to `max(3, min_cluster_size / 2)` when unset.
    pub min_samples: Option<usize>,
    /// Clusters born closer than this distance are merged into their parent.
    pub cluster_selection_epsilon: f32,
    pub selection_method: ClusterSelectionMethod,
    /// Space the primary clustering runs over.
    pub space: EmbeddingSpace,
    /// Upper bound on scenes per run (pairwise distances are held in memory).
    pub max_scenes: usize,
    /// Page size used when pulling scenes from a `SceneSource`.
    pub page_size: usize,
    /// Require vectors to match each space's native dimension.
    pub enforce_native_dimensions: bool,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 5,
            min_samples: None,
            cluster_selection_epsilon: 0.1,
            selection_method: ClusterSelectionMethod::EOM,
            space: EmbeddingSpace::Behavioral,
            max_scenes: 10_000,
            page_size: 500,
            enforce_native_dimensions: false,
        }
    }
}

impl ClusteringConfig {
    /// Effective min_samples.
    pub fn effective_min_samples(&self) -> usize {
        self.min_samples
            .unwrap_or_else(|| (self.min_cluster_size / 2).max(3))
    }
}

/// Per-cluster scoring settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Minimum statistically meaningful sample count.
    pub base_sample_size: u32,
    /// Scales mean risk in [0, 1] into a [0, multiplier] boost.
    pub risk_multiplier: f32,
    /// Clusters larger than this are sampled for the uniqueness score.
    pub uniqueness_sample_limit: usize,
    pub representative_count: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_sample_size: 50,
            risk_multiplier: 2.0,
            uniqueness_sample_limit: 200,
            representative_count: 5,
        }
    }
}

/// Fleet baseline / anomaly settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Closest-match similarity below this flags an anomaly.
    pub similarity_threshold: f32,
    /// Neighbors requested from the vector store.
    pub top_k: usize,
    /// Percentile rank at or above which the statistical check fires.
    pub statistical_percentile: f32,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            top_k: 25,
            statistical_percentile: 90.0,
        }
    }
}

/// Logging settings consumed by binaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

impl DiscoveryConfig {
    /// Load configuration from files and environment.
    pub fn load() -> DiscoveryResult<Self> {
        let env =
            std::env::var("FLEET_DISCOVERY_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("FLEET_DISCOVERY").separator("__"));

        let config: DiscoveryConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> DiscoveryResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DiscoveryError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: DiscoveryConfig = toml::from_str(&content)
            .map_err(|e| DiscoveryError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> DiscoveryResult<()> {
        let p = &self.preprocessing;
        if !(p.variance_epsilon >= 0.0 && p.variance_epsilon.is_finite()) {
            return Err(DiscoveryError::Config(format!(
                "preprocessing.variance_epsilon must be finite and >= 0, got {}",
                p.variance_epsilon
            )));
        }
        if !(p.explained_variance > 0.0 && p.explained_variance <= 1.0) {
            return Err(DiscoveryError::Config(format!(
                "preprocessing.explained_variance must be in (0, 1], got {}",
                p.explained_variance
            )));
        }

        let c = &self.clustering;
        if c.min_cluster_size < 2 {
            return Err(DiscoveryError::Config(format!(
                "clustering.min_cluster_size must be >= 2, got {}",
                c.min_cluster_size
            )));
        }
        if c.effective_min_samples() == 0 {
            return Err(DiscoveryError::Config(
                "clustering.min_samples must be >= 1".into(),
            ));
        }
        if !(c.cluster_selection_epsilon >= 0.0 && c.cluster_selection_epsilon.is_finite()) {
            return Err(DiscoveryError::Config(format!(
                "clustering.cluster_selection_epsilon must be finite and >= 0, got {}",
                c.cluster_selection_epsilon
            )));
        }
        if c.max_scenes < c.min_cluster_size {
            return Err(DiscoveryError::Config(format!(
                "clustering.max_scenes ({}) must be >= min_cluster_size ({})",
                c.max_scenes, c.min_cluster_size
            )));
        }
        if c.page_size == 0 {
            return Err(DiscoveryError::Config(
                "clustering.page_size must be greater than 0".into(),
            ));
        }

        let s = &self.scoring;
        if s.base_sample_size == 0 {
            return Err(DiscoveryError::Config(
                "scoring.base_sample_size must be greater than 0".into(),
            ));
        }
        if !(s.risk_multiplier >= 0.0 && s.risk_multiplier.is_finite()) {
            return Err(DiscoveryError::Config(format!(
                "scoring.risk_multiplier must be finite and >= 0, got {}",
                s.risk_multiplier
            )));
        }
        if s.uniqueness_sample_limit < 2 {
            return Err(DiscoveryError::Config(
                "scoring.uniqueness_sample_limit must be >= 2".into(),
            ));
        }

        let b = &self.baseline;
        if !(0.0..=1.0).contains(&b.similarity_threshold) {
            return Err(DiscoveryError::Config(format!(
                "baseline.similarity_threshold must be in [0, 1], got {}",
                b.similarity_threshold
            )));
        }
        if b.top_k == 0 {
            return Err(DiscoveryError::Config(
                "baseline.top_k must be greater than 0".into(),
            ));
        }
        if !(0.0..=100.0).contains(&b.statistical_percentile) {
            return Err(DiscoveryError::Config(format!(
                "baseline.statistical_percentile must be in [0, 100], got {}",
                b.statistical_percentile
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DiscoveryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clustering.min_cluster_size, 5);
        assert_eq!(config.clustering.effective_min_samples(), 3);
        assert_eq!(config.baseline.similarity_threshold, 0.75);
        assert_eq!(config.scoring.base_sample_size, 50);

        println!("[PASS] test_defaults_are_valid");
    }

    #[test]
    fn test_effective_min_samples_scales_with_cluster_size() {
        let mut clustering = ClusteringConfig::default();
        clustering.min_cluster_size = 10;
        assert_eq!(clustering.effective_min_samples(), 5);
        clustering.min_cluster_size = 2;
        assert_eq!(clustering.effective_min_samples(), 3);
        clustering.min_samples = Some(7);
        assert_eq!(clustering.effective_min_samples(), 7);
    }

    #[test]
    fn test_from_file_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "[clustering]\nmin_cluster_size = 8\nspace = \"visual\"\n\
             selection_method = \"leaf\"\n\n[baseline]\nsimilarity_threshold = 0.6"
        )
        .expect("write");

        let config = DiscoveryConfig::from_file(file.path()).expect("load");
        assert_eq!(config.clustering.min_cluster_size, 8);
        assert_eq!(config.clustering.space, EmbeddingSpace::Visual);
        assert_eq!(config.clustering.selection_method, ClusterSelectionMethod::Leaf);
        assert_eq!(config.clustering.cluster_selection_epsilon, 0.1);
        assert!((config.baseline.similarity_threshold - 0.6).abs() < 1e-6);
        assert_eq!(config.baseline.top_k, 25);

        println!("[PASS] test_from_file_partial_toml");
    }

    #[test]
    fn test_shipped_default_toml_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/default.toml");
        let config = DiscoveryConfig::from_file(&path).expect("shipped defaults load");
        assert_eq!(config, DiscoveryConfig::default());
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[clustering]\nmin_cluster_size = 1").expect("write");

        let err = DiscoveryConfig::from_file(file.path()).expect_err("must reject");
        assert!(err.to_string().contains("min_cluster_size"));
        assert_eq!(err.category(), crate::error::ErrorCategory::Configuration);
    }

    #[test]
    fn test_from_file_missing_path() {
        let err = DiscoveryConfig::from_file(Path::new("/nonexistent/fleet.toml"))
            .expect_err("must fail");
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_validation_rejects_threshold_out_of_range() {
        let mut config = DiscoveryConfig::default();
        config.baseline.similarity_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = DiscoveryConfig::default();
        config.preprocessing.explained_variance = 0.0;
        assert!(config.validate().is_err());
    }
}
