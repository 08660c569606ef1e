//! `stats` command: fleet statistics over a whole scene file.
//!
//! Distances are measured from each scene to the fleet centroid in the
//! chosen space.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use tracing::{debug, info};

use fleet_discovery_core::baseline::fleet_statistics;
use fleet_discovery_core::similarity::{cosine_distance, mean_vector};
use fleet_discovery_core::{
    DiscoveryConfig, EmbeddingSpace, FleetStatistics, NeighborMetadata, NeighborRecord,
    SceneEmbedding,
};

use super::{finish, load_scenes, print_json, SpaceArg};

/// Arguments for the `stats` command
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// JSON file holding an array of scenes
    #[arg(short, long)]
    pub input: PathBuf,

    /// Embedding space the centroid distances are measured in
    #[arg(long, value_enum, default_value = "behavioral")]
    pub space: SpaceArg,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    space: EmbeddingSpace,
    /// Scenes without a vector in `space`; they still count toward scores and tags.
    scenes_without_vector: usize,
    statistics: FleetStatistics,
}

/// Execute the stats command.
pub fn stats_command(args: StatsArgs, config: DiscoveryConfig) -> i32 {
    debug!("stats_command: args={:?}", args);
    finish("stats", run(args, config))
}

fn run(args: StatsArgs, config: DiscoveryConfig) -> anyhow::Result<()> {
    config.validate()?;
    let scenes = load_scenes(&args.input)?;
    let response = stats(&scenes, args.space.into());

    info!(
        fleet_size = response.statistics.fleet_size,
        space = %response.space,
        "stats complete"
    );
    print_json(&response)
}

fn stats(scenes: &[SceneEmbedding], space: EmbeddingSpace) -> StatsResponse {
    let centroid = mean_vector(scenes.iter().filter_map(|s| s.vector(space)));

    let mut scenes_without_vector = 0;
    let records: Vec<NeighborRecord> = scenes
        .iter()
        .map(|scene| {
            let metadata = NeighborMetadata::from_scene(scene);
            match scene.vector(space).filter(|v| v.len() == centroid.len()) {
                Some(vector) => {
                    let distance = cosine_distance(vector, &centroid);
                    NeighborRecord::new(scene.scene_id.clone(), distance).with_metadata(metadata)
                }
                None => {
                    scenes_without_vector += 1;
                    NeighborRecord {
                        id: scene.scene_id.clone(),
                        distance: None,
                        vector: None,
                        metadata,
                    }
                }
            }
        })
        .collect();

    StatsResponse {
        space,
        scenes_without_vector,
        statistics: fleet_statistics(&records, None),
    }
}
