//! Batch scene discovery: preprocessing, density clustering and the
//! homogeneous-fleet fallback.
//!
//! # Flow
//!
//! 1. Bound and validate the batch (size, per-space dimensions)
//! 2. Preprocess the primary space (behavioral unless configured otherwise)
//! 3. HDBSCAN over the L2-normalized rows
//! 4. One [`DiscoveredCluster`] per density cluster, noise dropped
//! 5. Zero density clusters: one global fallback cluster holding every scene
//!
//! Clusters are ordered by member count (descending) with ties broken by the
//! smallest member index, then numbered from 1.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::hdbscan::{DistanceMetric, HDBSCANClusterer, HDBSCANParams, NOISE_LABEL};
use crate::preprocess::{stack_rows, PreprocessOutcome, PreprocessReport, VectorPreprocessor};
use crate::scoring::ClusterScorer;
use crate::similarity::mean_vector;
use crate::space::EmbeddingSpace;
use crate::store::SceneSource;
use crate::types::{DiscoveredCluster, DiscoveryMethod, SceneEmbedding, GLOBAL_FALLBACK_CLUSTER_ID};

/// Result of one discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringOutcome {
    pub run_id: Uuid,
    /// Space the clustering ran over.
    pub space: EmbeddingSpace,
    pub total_scenes: usize,
    /// Ordered by size, largest first. Never empty.
    pub clusters: Vec<DiscoveredCluster>,
    /// Scenes left out of every density cluster.
    pub noise_scene_ids: Vec<String>,
    pub preprocess_report: PreprocessReport,
    /// Silhouette over the preprocessed space; 0.0 when not computable.
    pub silhouette_score: f32,
}

impl ClusteringOutcome {
    /// Whether the run fell back to a single all-inclusive cluster.
    pub fn is_global_fallback(&self) -> bool {
        self.clusters.len() == 1 && self.clusters[0].is_global_fallback()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Scenes assigned to some cluster.
    pub fn clustered_scene_count(&self) -> usize {
        self.clusters.iter().map(|c| c.scene_count).sum()
    }
}

/// Runs discovery over scene batches.
#[derive(Debug, Clone, Default)]
pub struct ClusteringEngine {
    config: DiscoveryConfig,
    scorer: ClusterScorer,
}

impl ClusteringEngine {
    pub fn new(config: DiscoveryConfig) -> Self {
        let scorer = ClusterScorer::new(config.scoring.clone());
        Self { config, scorer }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn scorer(&self) -> &ClusterScorer {
        &self.scorer
    }

    /// Discover clusters in `scenes`.
    ///
    /// Member indices in the returned clusters refer to positions in `scenes`.
    ///
    /// # Errors
    ///
    /// - `MemoryLimit` above `clustering.max_scenes`
    /// - `InsufficientData` below `clustering.min_cluster_size`
    /// - `DimensionMismatch` / `InvalidValue` for inconsistent vectors
    /// - `RankDeficiency` / `AlgorithmFailure` from the numerical stages
    pub fn discover(&self, scenes: &[SceneEmbedding]) -> DiscoveryResult<ClusteringOutcome> {
        let cfg = &self.config.clustering;
        let n = scenes.len();
        let space = cfg.space;

        if n > cfg.max_scenes {
            return Err(DiscoveryError::MemoryLimit {
                scenes: n,
                limit: cfg.max_scenes,
            });
        }
        if n < cfg.min_cluster_size {
            return Err(DiscoveryError::insufficient_data(cfg.min_cluster_size, n));
        }

        self.validate_dimensions(scenes)?;

        let rows = scenes
            .iter()
            .map(|scene| {
                scene
                    .vector(space)
                    .map(|v| (scene.scene_id.as_str(), v))
                    .ok_or_else(|| {
                        DiscoveryError::invalid_value(format!(
                            "scene {} has no {} vector",
                            scene.scene_id, space
                        ))
                    })
            })
            .collect::<DiscoveryResult<Vec<_>>>()?;
        let matrix = stack_rows(rows, None)?;

        let preprocessor =
            VectorPreprocessor::new(self.config.preprocessing.clone(), cfg.min_cluster_size);
        let prepared = match preprocessor.process(matrix.view())? {
            PreprocessOutcome::Ready(prepared) => prepared,
            PreprocessOutcome::Skipped { rows, required } => {
                return Err(DiscoveryError::insufficient_data(required, rows));
            }
        };

        let params = HDBSCANParams::default()
            .with_min_cluster_size(cfg.min_cluster_size)
            .with_min_samples(cfg.effective_min_samples())
            .with_selection_epsilon(cfg.cluster_selection_epsilon)
            .with_selection_method(cfg.selection_method)
            .with_metric(DistanceMetric::Euclidean);
        let fit = HDBSCANClusterer::new(params).fit(prepared.matrix.view())?;

        let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        let mut noise_scene_ids = Vec::new();
        for (i, &label) in fit.labels.iter().enumerate() {
            if label == NOISE_LABEL {
                noise_scene_ids.push(scenes[i].scene_id.clone());
            } else {
                groups.entry(label).or_default().push(i);
            }
        }

        let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
        groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));

        let clusters = if groups.is_empty() {
            info!(
                scenes = n,
                space = %space,
                "No natural clusters found; using global fallback cluster"
            );
            noise_scene_ids.clear();
            let members: Vec<usize> = (0..n).collect();
            vec![self.build_cluster(
                GLOBAL_FALLBACK_CLUSTER_ID,
                members,
                scenes,
                DiscoveryMethod::GlobalFallback,
                1.0,
            )]
        } else {
            groups
                .into_iter()
                .enumerate()
                .map(|(rank, members)| {
                    let mean_probability = members
                        .iter()
                        .map(|&i| fit.probabilities[i])
                        .sum::<f32>()
                        / members.len() as f32;
                    self.build_cluster(
                        rank as u32 + 1,
                        members,
                        scenes,
                        DiscoveryMethod::DensityClustering,
                        mean_probability,
                    )
                })
                .collect()
        };

        let outcome = ClusteringOutcome {
            run_id: Uuid::new_v4(),
            space,
            total_scenes: n,
            clusters,
            noise_scene_ids,
            preprocess_report: prepared.report,
            silhouette_score: fit.silhouette,
        };

        info!(
            run_id = %outcome.run_id,
            scenes = n,
            clusters = outcome.clusters.len(),
            noise = outcome.noise_scene_ids.len(),
            fallback = outcome.is_global_fallback(),
            silhouette = %format!("{:.4}", outcome.silhouette_score),
            "Scene discovery complete"
        );

        Ok(outcome)
    }

    /// Page scenes from `source` (up to `clustering.max_scenes`) and discover
    /// clusters over them.
    ///
    /// Returns the fetched scenes alongside the outcome, since cluster member
    /// indices refer to them.
    pub fn discover_from_source(
        &self,
        source: &dyn SceneSource,
    ) -> DiscoveryResult<(Vec<SceneEmbedding>, ClusteringOutcome)> {
        let (scenes, truncated) = self.fetch_bounded(source)?;
        if truncated {
            warn!(
                limit = self.config.clustering.max_scenes,
                "Scene source has more scenes than clustering.max_scenes; truncating"
            );
        }

        let outcome = self.discover(&scenes)?;
        Ok((scenes, outcome))
    }

    /// Page up to `clustering.max_scenes` scenes. The flag is set only when a
    /// follow-up fetch past the limit still returned data.
    fn fetch_bounded(
        &self,
        source: &dyn SceneSource,
    ) -> DiscoveryResult<(Vec<SceneEmbedding>, bool)> {
        let cfg = &self.config.clustering;
        let mut scenes: Vec<SceneEmbedding> = Vec::new();

        loop {
            let remaining = cfg.max_scenes.saturating_sub(scenes.len());
            if remaining == 0 {
                let beyond = source.fetch_scenes(scenes.len(), 1)?;
                return Ok((scenes, !beyond.is_empty()));
            }
            let limit = cfg.page_size.min(remaining);
            let page = source.fetch_scenes(scenes.len(), limit)?;
            let fetched = page.len();
            debug!(offset = scenes.len(), fetched, "Fetched scene page");
            scenes.extend(page.into_iter().take(limit));
            if fetched < limit {
                return Ok((scenes, false));
            }
        }
    }

    /// Every scene's vectors must agree in length per space.
    fn validate_dimensions(&self, scenes: &[SceneEmbedding]) -> DiscoveryResult<()> {
        let enforce = self.config.clustering.enforce_native_dimensions;
        let primary = self.config.clustering.space;

        for space in EmbeddingSpace::all() {
            let mut expected = if enforce && (space != EmbeddingSpace::Legacy || space == primary) {
                Some(space.dimension())
            } else {
                None
            };

            for scene in scenes {
                let Some(vector) = scene.vector(space) else {
                    continue;
                };
                match expected {
                    None => expected = Some(vector.len()),
                    Some(dim) if dim != vector.len() => {
                        return Err(DiscoveryError::dimension_mismatch(
                            dim,
                            vector.len(),
                            format!("{} vector of scene {}", space, scene.scene_id),
                        ));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    fn build_cluster(
        &self,
        cluster_id: u32,
        member_indices: Vec<usize>,
        scenes: &[SceneEmbedding],
        discovery_method: DiscoveryMethod,
        mean_membership_probability: f32,
    ) -> DiscoveredCluster {
        let space = self.config.clustering.space;
        let count = member_indices.len();
        let members: Vec<&SceneEmbedding> = member_indices.iter().map(|&i| &scenes[i]).collect();

        let risks: Vec<f32> = members.iter().map(|s| s.risk_score).collect();
        let average_risk_score =
            members.iter().map(|s| s.sanitized_risk()).sum::<f32>() / count as f32;
        let average_safety_score =
            members.iter().map(|s| s.sanitized_safety()).sum::<f32>() / count as f32;

        let space_vectors: Vec<&[f32]> = members.iter().filter_map(|s| s.vector(space)).collect();
        let uniqueness_score = self.scorer.uniqueness_score(&space_vectors);

        let centroid_behavioral =
            mean_vector(members.iter().map(|s| s.behavioral_vector.as_slice()));
        let centroid_visual = mean_vector(members.iter().map(|s| s.visual_vector.as_slice()));
        let centroid_legacy =
            Some(mean_vector(members.iter().filter_map(|s| s.legacy_vector.as_deref())))
                .filter(|c| !c.is_empty());

        let category_name =
            self.scorer
                .fallback_category_name(count, scenes.len(), average_risk_score);

        debug!(
            cluster_id,
            scenes = count,
            method = ?discovery_method,
            avg_risk = %format!("{:.3}", average_risk_score),
            uniqueness = %format!("{:.3}", uniqueness_score),
            "Built discovered cluster"
        );

        DiscoveredCluster {
            cluster_id,
            scene_ids: members.iter().map(|s| s.scene_id.clone()).collect(),
            member_indices,
            scene_count: count,
            average_risk_score,
            average_safety_score,
            uniqueness_score,
            risk_adaptive_target: self.scorer.risk_adaptive_target(&risks),
            centroid_behavioral,
            centroid_visual,
            centroid_legacy,
            discovery_method,
            mean_membership_probability,
            category_name,
            discovered_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::representative::RepresentativeSelector;
    use crate::store::InMemoryVectorStore;
    use parking_lot::Mutex;

    fn grouped_scene(i: usize, group: usize, dim: usize, noise: f32) -> SceneEmbedding {
        let half = dim / 2;
        let vector: Vec<f32> = (0..dim)
            .map(|j| {
                let base = if (j < half) == (group == 0) { 1.0 } else { 0.0 };
                base + noise * ((i * 31 + j * 17) as f32).sin()
            })
            .collect();
        SceneEmbedding::new(format!("scene-{:02}", i), vector.clone(), vector)
            .with_scores(0.2 * group as f32, 0.8)
    }

    fn engine() -> ClusteringEngine {
        ClusteringEngine::new(DiscoveryConfig::default())
    }

    #[test]
    fn test_rejects_too_few_scenes() {
        let scenes: Vec<SceneEmbedding> = (0..4).map(|i| grouped_scene(i, 0, 8, 0.05)).collect();
        let err = engine().discover(&scenes).expect_err("too few");
        assert_eq!(err.category().as_str(), "insufficient-data");

        println!("[PASS] test_rejects_too_few_scenes - {}", err);
    }

    #[test]
    fn test_rejects_batch_above_memory_limit() {
        let mut config = DiscoveryConfig::default();
        config.clustering.max_scenes = 6;
        let scenes: Vec<SceneEmbedding> = (0..7).map(|i| grouped_scene(i, 0, 8, 0.05)).collect();
        let err = ClusteringEngine::new(config).discover(&scenes).expect_err("limit");
        assert!(matches!(err, DiscoveryError::MemoryLimit { scenes: 7, limit: 6 }));
    }

    #[test]
    fn test_rejects_inconsistent_dimensions() {
        let mut scenes: Vec<SceneEmbedding> =
            (0..6).map(|i| grouped_scene(i, 0, 8, 0.05)).collect();
        scenes[3].visual_vector.push(1.0);
        let err = engine().discover(&scenes).expect_err("mismatch");
        assert!(matches!(err, DiscoveryError::DimensionMismatch { expected: 8, actual: 9, .. }));
        assert!(err.to_string().contains("scene-03"));
    }

    #[test]
    fn test_native_dimensions_enforced_when_configured() {
        let mut config = DiscoveryConfig::default();
        config.clustering.enforce_native_dimensions = true;
        let scenes: Vec<SceneEmbedding> = (0..6).map(|i| grouped_scene(i, 0, 8, 0.05)).collect();
        let err = ClusteringEngine::new(config).discover(&scenes).expect_err("native dims");
        assert!(matches!(err, DiscoveryError::DimensionMismatch { expected: 1536, .. }));
    }

    #[test]
    fn test_missing_legacy_vectors_rejected_for_legacy_space() {
        let mut config = DiscoveryConfig::default();
        config.clustering.space = EmbeddingSpace::Legacy;
        let scenes: Vec<SceneEmbedding> = (0..6).map(|i| grouped_scene(i, 0, 8, 0.05)).collect();
        let err = ClusteringEngine::new(config).discover(&scenes).expect_err("no legacy");
        assert_eq!(err.category().as_str(), "invalid-value");
    }

    #[test]
    fn test_two_groups_are_ordered_and_numbered() {
        let mut scenes: Vec<SceneEmbedding> =
            (0..6).map(|i| grouped_scene(i, 1, 16, 0.05)).collect();
        scenes.extend((6..13).map(|i| grouped_scene(i, 0, 16, 0.05)));

        let outcome = engine().discover(&scenes).expect("discover");
        assert_eq!(outcome.cluster_count(), 2);
        assert_eq!(outcome.clusters[0].cluster_id, 1);
        assert_eq!(outcome.clusters[0].scene_count, 7);
        assert_eq!(outcome.clusters[0].member_indices, (6..13).collect::<Vec<_>>());
        assert_eq!(outcome.clusters[1].cluster_id, 2);
        assert_eq!(outcome.clusters[1].scene_count, 6);
        assert!((outcome.clusters[1].average_risk_score - 0.2).abs() < 1e-6);
        assert_eq!(outcome.clusters[1].risk_adaptive_target, 70);
        assert_eq!(outcome.clusters[0].centroid_behavioral.len(), 16);
        assert!(outcome.noise_scene_ids.is_empty());
        assert!(outcome.silhouette_score > 0.5);

        println!(
            "[PASS] test_two_groups_are_ordered_and_numbered - sizes={:?}",
            outcome.clusters.iter().map(|c| c.scene_count).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_fallback_cluster_holds_every_scene() {
        let scenes: Vec<SceneEmbedding> = (0..8).map(|i| grouped_scene(i, 0, 16, 0.001)).collect();
        let outcome = engine().discover(&scenes).expect("discover");

        assert!(outcome.is_global_fallback());
        let cluster = &outcome.clusters[0];
        assert_eq!(cluster.cluster_id, GLOBAL_FALLBACK_CLUSTER_ID);
        assert_eq!(cluster.scene_count, 8);
        assert_eq!(cluster.mean_membership_probability, 1.0);
        assert_eq!(cluster.category_name, "Frequent Low Risk Scenarios");
        assert!(outcome.noise_scene_ids.is_empty());
    }

    #[test]
    fn test_all_constant_vectors_fall_back() {
        let scenes: Vec<SceneEmbedding> = (0..6)
            .map(|i| SceneEmbedding::new(format!("c{}", i), vec![0.5; 4], vec![0.5; 4]))
            .collect();
        let outcome = engine().discover(&scenes).expect("discover");
        assert!(outcome.is_global_fallback());
        assert_eq!(outcome.preprocess_report.output_columns, 0);
        assert_eq!(outcome.clusters[0].centroid_behavioral, vec![0.5; 4]);
    }

    #[test]
    fn test_discover_from_source_pages_until_exhausted() {
        let mut config = DiscoveryConfig::default();
        config.clustering.page_size = 5;
        let store = InMemoryVectorStore::from_scenes(
            (0..12).map(|i| grouped_scene(i, i / 6, 16, 0.05)).collect(),
        );

        let (scenes, outcome) = ClusteringEngine::new(config)
            .discover_from_source(&store)
            .expect("discover");
        assert_eq!(scenes.len(), 12);
        assert_eq!(outcome.total_scenes, 12);
        assert_eq!(outcome.cluster_count(), 2);
    }

    #[test]
    fn test_discover_from_source_truncates_at_max_scenes() {
        let mut config = DiscoveryConfig::default();
        config.clustering.page_size = 4;
        config.clustering.max_scenes = 10;
        let store = InMemoryVectorStore::from_scenes(
            (0..12).map(|i| grouped_scene(i, 0, 16, 0.05)).collect(),
        );

        let (scenes, _) = ClusteringEngine::new(config)
            .discover_from_source(&store)
            .expect("discover");
        assert_eq!(scenes.len(), 10);
    }

    #[test]
    fn test_legacy_space_clusters_carry_legacy_centroid() {
        let mut config = DiscoveryConfig::default();
        config.clustering.space = EmbeddingSpace::Legacy;
        let scenes: Vec<SceneEmbedding> = (0..12)
            .map(|i| {
                let mut scene = grouped_scene(i, i / 6, 6, 0.05);
                scene.legacy_vector = Some(grouped_scene(i, i / 6, 4, 0.05).behavioral_vector);
                scene
            })
            .collect();

        let outcome = ClusteringEngine::new(config).discover(&scenes).expect("discover");
        let selector = RepresentativeSelector::default();
        for cluster in &outcome.clusters {
            assert_eq!(cluster.centroid(EmbeddingSpace::Legacy).len(), 4);
            assert_eq!(cluster.centroid(EmbeddingSpace::Behavioral).len(), 6);

            let reps = selector
                .for_cluster(cluster, &scenes, EmbeddingSpace::Legacy)
                .expect("legacy representatives");
            assert!(!reps.is_empty());
            assert!(reps.iter().all(|r| cluster.member_indices.contains(&r.index)));
            let best = selector
                .most_representative_for_cluster(cluster, &scenes, EmbeddingSpace::Legacy)
                .expect("most representative");
            assert!(best.is_some());
        }

        println!(
            "[PASS] test_legacy_space_clusters_carry_legacy_centroid - clusters={}",
            outcome.cluster_count()
        );
    }

    #[test]
    fn test_behavioral_clusters_without_legacy_vectors_have_no_legacy_centroid() {
        let scenes: Vec<SceneEmbedding> = (0..8).map(|i| grouped_scene(i, 0, 16, 0.001)).collect();
        let outcome = engine().discover(&scenes).expect("discover");
        assert!(outcome.clusters[0].centroid_legacy.is_none());
        assert!(outcome.clusters[0].centroid(EmbeddingSpace::Legacy).is_empty());
    }

    /// Records every `(offset, limit)` request it serves.
    struct CountingSource {
        inner: InMemoryVectorStore,
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl SceneSource for CountingSource {
        fn fetch_scenes(
            &self,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<SceneEmbedding>, StoreError> {
            self.calls.lock().push((offset, limit));
            self.inner.fetch_scenes(offset, limit)
        }
    }

    fn counting_source(count: usize) -> CountingSource {
        CountingSource {
            inner: InMemoryVectorStore::from_scenes(
                (0..count).map(|i| grouped_scene(i, 0, 16, 0.05)).collect(),
            ),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn test_source_holding_exactly_max_scenes_is_not_truncated() {
        let mut config = DiscoveryConfig::default();
        config.clustering.page_size = 5;
        config.clustering.max_scenes = 10;
        let source = counting_source(10);

        let (scenes, truncated) = ClusteringEngine::new(config)
            .fetch_bounded(&source)
            .expect("fetch");
        assert_eq!(scenes.len(), 10);
        assert!(!truncated);
        assert_eq!(*source.calls.lock(), vec![(0, 5), (5, 5), (10, 1)]);

        println!("[PASS] test_source_holding_exactly_max_scenes_is_not_truncated");
    }

    #[test]
    fn test_source_beyond_max_scenes_is_flagged_truncated() {
        let mut config = DiscoveryConfig::default();
        config.clustering.page_size = 4;
        config.clustering.max_scenes = 10;
        let source = counting_source(11);

        let (scenes, truncated) = ClusteringEngine::new(config)
            .fetch_bounded(&source)
            .expect("fetch");
        assert_eq!(scenes.len(), 10);
        assert!(truncated);
        assert_eq!(*source.calls.lock(), vec![(0, 4), (4, 4), (8, 2), (10, 1)]);
    }
}
