//! Category naming through an optional external collaborator.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::NamingError;
use crate::representative::RepresentativeSelector;
use crate::space::EmbeddingSpace;
use crate::types::{DiscoveredCluster, SceneEmbedding};

/// Everything a namer gets to see about one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingRequest {
    pub cluster_id: u32,
    pub scene_count: usize,
    pub total_scenes: usize,
    pub average_risk_score: f32,
    pub uniqueness_score: f32,
    /// Deterministic label the cluster carries now.
    pub fallback_name: String,
    /// Descriptions of the most representative members, closest first.
    pub representative_descriptions: Vec<String>,
}

/// Produces human-readable category names.
pub trait CategoryNamer: Send + Sync {
    fn name_cluster(&self, request: &NamingRequest) -> Result<String, NamingError>;
}

/// Name every cluster, keeping the deterministic label where the namer fails.
///
/// Returns the number of clusters the namer renamed. Never fails.
pub fn assign_category_names(
    clusters: &mut [DiscoveredCluster],
    scenes: &[SceneEmbedding],
    namer: &dyn CategoryNamer,
    selector: &RepresentativeSelector,
) -> usize {
    let mut renamed = 0;

    for cluster in clusters.iter_mut() {
        let request = build_request(cluster, scenes, selector);
        match namer.name_cluster(&request) {
            Ok(name) if !name.trim().is_empty() => {
                debug!(cluster_id = cluster.cluster_id, name = %name, "Cluster named");
                cluster.set_category_name(name.trim());
                renamed += 1;
            }
            Ok(_) => {
                warn!(
                    cluster_id = cluster.cluster_id,
                    fallback = %cluster.category_name,
                    error = %NamingError::EmptyLabel,
                    "Namer failed; keeping fallback label"
                );
            }
            Err(e) => {
                warn!(
                    cluster_id = cluster.cluster_id,
                    fallback = %cluster.category_name,
                    error = %e,
                    "Namer failed; keeping fallback label"
                );
            }
        }
    }

    renamed
}

fn build_request(
    cluster: &DiscoveredCluster,
    scenes: &[SceneEmbedding],
    selector: &RepresentativeSelector,
) -> NamingRequest {
    let representative_descriptions = selector
        .for_cluster(cluster, scenes, EmbeddingSpace::Behavioral)
        .map(|reps| {
            reps.iter()
                .filter_map(|r| scenes.get(r.index))
                .filter_map(|s| s.description.clone())
                .collect()
        })
        .unwrap_or_default();

    NamingRequest {
        cluster_id: cluster.cluster_id,
        scene_count: cluster.scene_count,
        total_scenes: scenes.len(),
        average_risk_score: cluster.average_risk_score,
        uniqueness_score: cluster.uniqueness_score,
        fallback_name: cluster.category_name.clone(),
        representative_descriptions,
    }
}
