//! Fleet Discovery Core Library
//!
//! Discovers natural groupings of driving scenes from their behavioral and
//! visual embeddings, and scores individual scenes against a fleet-wide
//! baseline.
//!
//! # Architecture
//!
//! This crate defines:
//! - Scene and cluster records (`SceneEmbedding`, `DiscoveredCluster`)
//! - Preprocessing (`VectorPreprocessor`) and HDBSCAN clustering
//! - Discovery (`ClusteringEngine`) with per-cluster scoring and
//!   representative selection
//! - Fleet anomaly scoring (`FleetBaselineEngine`)
//! - Collaborator traits (`VectorStore`, `SceneSource`, `CategoryNamer`)
//! - Error types and configuration
//!
//! # Example
//!
//! ```
//! use fleet_discovery_core::{ClusteringEngine, DiscoveryConfig, SceneEmbedding};
//!
//! let scenes: Vec<SceneEmbedding> = (0..6)
//!     .map(|i| SceneEmbedding::new(format!("s{}", i), vec![1.0, 0.0, 0.5], vec![0.2, 0.8]))
//!     .collect();
//!
//! let outcome = ClusteringEngine::new(DiscoveryConfig::default())
//!     .discover(&scenes)
//!     .unwrap();
//! assert!(outcome.is_global_fallback());
//! assert_eq!(outcome.clusters[0].scene_count, 6);
//! ```

pub mod baseline;
pub mod clustering;
pub mod config;
pub mod error;
pub mod hdbscan;
pub mod naming;
pub mod preprocess;
pub mod representative;
pub mod scoring;
pub mod similarity;
pub mod space;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use baseline::{
    AnomalyAssessment, FleetBaselineEngine, FleetStatistics, PercentileStats, SceneAssessment,
};
pub use clustering::{ClusteringEngine, ClusteringOutcome};
pub use crate::config::DiscoveryConfig;
pub use error::{DiscoveryError, DiscoveryResult, ErrorCategory, NamingError, StoreError};
pub use naming::{assign_category_names, CategoryNamer, NamingRequest};
pub use preprocess::{PreprocessOutcome, PreprocessReport, VectorPreprocessor};
pub use representative::{RepresentativeScene, RepresentativeSelector};
pub use scoring::ClusterScorer;
pub use space::EmbeddingSpace;
pub use store::{
    InMemoryVectorStore, LazyVectorStore, NeighborMetadata, NeighborRecord, SceneSource, ScoreKind,
    VectorStore,
};
pub use types::{DiscoveredCluster, DiscoveryMethod, SceneEmbedding, GLOBAL_FALLBACK_CLUSTER_ID};
