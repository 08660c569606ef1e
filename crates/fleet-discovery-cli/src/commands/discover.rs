//! `discover` command: cluster a scene file into categories.
//!
//! # Output
//!
//! ```json
//! {
//!   "outcome": { "run_id": "...", "clusters": [...], "noise_scene_ids": [...], ... },
//!   "representatives": [ { "cluster_id": 1, "scenes": [...] } ]
//! }
//! ```

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use tracing::{debug, info};

use fleet_discovery_core::{
    ClusteringEngine, ClusteringOutcome, DiscoveryConfig, RepresentativeScene,
    RepresentativeSelector, SceneEmbedding,
};

use super::{finish, load_scenes, print_json, SpaceArg};

/// Arguments for the `discover` command
#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// JSON file holding an array of scenes
    #[arg(short, long)]
    pub input: PathBuf,

    /// Minimum scenes per density cluster (overrides configuration)
    #[arg(long)]
    pub min_cluster_size: Option<usize>,

    /// Embedding space to cluster in (overrides configuration)
    #[arg(long, value_enum)]
    pub space: Option<SpaceArg>,

    /// Representative scenes listed per cluster
    #[arg(long)]
    pub representatives: Option<usize>,
}

/// Representatives of one cluster.
#[derive(Debug, Serialize)]
struct ClusterRepresentatives {
    cluster_id: u32,
    scenes: Vec<RepresentativeScene>,
}

#[derive(Debug, Serialize)]
struct DiscoverResponse {
    outcome: ClusteringOutcome,
    representatives: Vec<ClusterRepresentatives>,
}

/// Execute the discover command.
pub fn discover_command(args: DiscoverArgs, config: DiscoveryConfig) -> i32 {
    debug!("discover_command: args={:?}", args);
    finish("discover", run(args, config))
}

fn run(args: DiscoverArgs, mut config: DiscoveryConfig) -> anyhow::Result<()> {
    if let Some(min_cluster_size) = args.min_cluster_size {
        config.clustering.min_cluster_size = min_cluster_size;
    }
    if let Some(space) = args.space {
        config.clustering.space = space.into();
    }
    if let Some(count) = args.representatives {
        config.scoring.representative_count = count;
    }
    config.validate()?;

    let scenes = load_scenes(&args.input)?;
    let response = discover(&scenes, config)?;

    info!(
        clusters = response.outcome.cluster_count(),
        fallback = response.outcome.is_global_fallback(),
        noise = response.outcome.noise_scene_ids.len(),
        "discover complete"
    );
    print_json(&response)
}

fn discover(
    scenes: &[SceneEmbedding],
    config: DiscoveryConfig,
) -> anyhow::Result<DiscoverResponse> {
    let selector = RepresentativeSelector::new(config.scoring.representative_count);
    let space = config.clustering.space;
    let outcome = ClusteringEngine::new(config).discover(scenes)?;

    let mut representatives = Vec::with_capacity(outcome.clusters.len());
    for cluster in &outcome.clusters {
        representatives.push(ClusterRepresentatives {
            cluster_id: cluster.cluster_id,
            scenes: selector.for_cluster(cluster, scenes, space)?,
        });
    }

    Ok(DiscoverResponse {
        outcome,
        representatives,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_discovery_core::{DiscoveryError, EmbeddingSpace};

    fn scenes(count: usize) -> Vec<SceneEmbedding> {
        (0..count)
            .map(|i| {
                SceneEmbedding::new(
                    format!("s{}", i),
                    vec![1.0, 0.5, 0.25 + 0.001 * i as f32],
                    vec![0.3, 0.7],
                )
                .with_scores(0.8, 0.2)
            })
            .collect()
    }

    #[test]
    fn test_discover_homogeneous_file_reports_fallback() {
        let input = scenes(7);
        let mut config = DiscoveryConfig::default();
        config.scoring.representative_count = 3;

        let response = discover(&input, config).expect("discover");
        assert!(response.outcome.is_global_fallback());
        assert_eq!(response.representatives.len(), 1);
        assert_eq!(response.representatives[0].cluster_id, 0);
        assert_eq!(response.representatives[0].scenes.len(), 3);
        assert_eq!(
            response.outcome.clusters[0].category_name,
            "Frequent High Risk Scenarios"
        );

        let json = serde_json::to_value(&response).expect("serialize");
        assert_eq!(json["outcome"]["clusters"][0]["discovery_method"], "global_fallback");

        println!("[PASS] test_discover_homogeneous_file_reports_fallback");
    }

    #[test]
    fn test_discover_too_few_scenes_is_typed_error() {
        let err = discover(&scenes(2), DiscoveryConfig::default()).expect_err("too few");
        let discovery = err.downcast_ref::<DiscoveryError>().expect("typed error");
        assert!(matches!(discovery, DiscoveryError::InsufficientData { .. }));
    }

    #[test]
    fn test_discover_in_legacy_space_ranks_against_legacy_centroid() {
        let input: Vec<SceneEmbedding> = scenes(7)
            .into_iter()
            .enumerate()
            .map(|(i, mut scene)| {
                scene.legacy_vector = Some(vec![0.2, 0.4, 0.6, 0.8 + 0.01 * i as f32]);
                scene
            })
            .collect();
        let mut config = DiscoveryConfig::default();
        config.clustering.space = EmbeddingSpace::Legacy;

        let response = discover(&input, config).expect("legacy discover");
        let cluster = &response.outcome.clusters[0];
        assert_eq!(cluster.centroid_legacy.as_ref().map(Vec::len), Some(4));
        assert!(!response.representatives[0].scenes.is_empty());
    }
}
