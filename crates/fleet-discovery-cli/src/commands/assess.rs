//! `assess` command: score one scene against the rest of the fleet.
//!
//! The fleet is every other scene of the input file, served from an
//! in-memory store behind the lazy client handle.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use tracing::{debug, info};

use fleet_discovery_core::{
    AnomalyAssessment, DiscoveryConfig, DiscoveryError, EmbeddingSpace, FleetBaselineEngine,
    FleetStatistics, InMemoryVectorStore, LazyVectorStore, SceneEmbedding,
};

use super::{finish, load_scenes, print_json, SpaceArg};

/// Arguments for the `assess` command
#[derive(Args, Debug)]
pub struct AssessArgs {
    /// JSON file holding an array of scenes
    #[arg(short, long)]
    pub input: PathBuf,

    /// Scene to assess; the remaining scenes form the fleet baseline
    #[arg(long)]
    pub scene_id: String,

    /// Neighbors to compare against (overrides configuration)
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Closest-match similarity below which the scene is anomalous
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Embedding space to compare in
    #[arg(long, value_enum, default_value = "behavioral")]
    pub space: SpaceArg,

    /// Similar fleet scenes listed in the output
    #[arg(long, default_value_t = 5)]
    pub similar: usize,
}

#[derive(Debug, Serialize)]
struct SimilarScene {
    scene_id: String,
    distance: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AssessResponse {
    scene_id: String,
    space: EmbeddingSpace,
    assessment: AnomalyAssessment,
    statistics: FleetStatistics,
    similar_scenes: Vec<SimilarScene>,
}

/// Execute the assess command.
pub fn assess_command(args: AssessArgs, config: DiscoveryConfig) -> i32 {
    debug!("assess_command: args={:?}", args);
    finish("assess", run(args, config))
}

fn run(args: AssessArgs, mut config: DiscoveryConfig) -> anyhow::Result<()> {
    if let Some(top_k) = args.top_k {
        config.baseline.top_k = top_k;
    }
    if let Some(threshold) = args.threshold {
        config.baseline.similarity_threshold = threshold;
    }
    config.validate()?;

    let scenes = load_scenes(&args.input)?;
    let response = assess(
        scenes,
        &args.scene_id,
        args.space.into(),
        args.similar,
        config,
    )?;

    info!(
        scene_id = %response.scene_id,
        is_anomaly = response.assessment.is_anomaly,
        anomaly_score = response.assessment.anomaly_score,
        "assess complete"
    );
    print_json(&response)
}

fn assess(
    mut scenes: Vec<SceneEmbedding>,
    scene_id: &str,
    space: EmbeddingSpace,
    similar: usize,
    config: DiscoveryConfig,
) -> anyhow::Result<AssessResponse> {
    let position = scenes
        .iter()
        .position(|s| s.scene_id == scene_id)
        .ok_or_else(|| {
            DiscoveryError::invalid_value(format!("scene {} not found in input", scene_id))
        })?;
    let query = scenes.swap_remove(position);
    let vector = query
        .vector(space)
        .ok_or_else(|| {
            DiscoveryError::invalid_value(format!("scene {} has no {} vector", scene_id, space))
        })?
        .to_vec();

    let fleet = scenes;
    let store = LazyVectorStore::new(move || Ok(InMemoryVectorStore::from_scenes(fleet.clone())));
    let engine = FleetBaselineEngine::new(store, config.baseline);

    let report = engine.assess_scene(space, &vector, Some(scene_id));
    let similar_scenes = engine
        .similar_scenes(space, &vector, similar, Some(scene_id))
        .into_iter()
        .map(|n| SimilarScene {
            scene_id: n.id,
            distance: n.distance,
        })
        .collect();

    Ok(AssessResponse {
        scene_id: query.scene_id,
        space,
        assessment: report.assessment,
        statistics: report.statistics,
        similar_scenes,
    })
}
