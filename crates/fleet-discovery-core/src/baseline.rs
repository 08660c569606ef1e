//! Fleet baseline: nearest-neighbor anomaly scoring and fleet statistics.
//!
//! # Signals
//!
//! Two independent anomaly signals are exposed on every assessment:
//! - **Threshold**: the closest fleet match's similarity (1 - cosine distance)
//!   is compared with a fixed threshold
//! - **Percentile rank**: the closest-match distance is ranked against a
//!   reference distribution of nearest-neighbor distances
//!
//! # Failure policy
//!
//! - Empty baseline (cold start): flagged as an anomaly with score 1.0
//! - Malformed neighbors or store failures: fail open (not an anomaly,
//!   score 0.0) with the diagnostic in `reason`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BaselineConfig;
use crate::similarity::cosine_distance;
use crate::space::EmbeddingSpace;
use crate::store::{NeighborRecord, VectorStore};

/// Label used for missing categorical metadata.
pub const UNKNOWN_CATEGORY: &str = "unknown";

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Summary statistics of one numeric field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentileStats {
    pub mean: f32,
    pub min: f32,
    pub max: f32,
    pub p25: f32,
    pub p50: f32,
    pub p75: f32,
    pub p90: f32,
    pub p95: f32,
}

impl PercentileStats {
    /// Statistics over `values`; all zeros when empty.
    ///
    /// Percentiles use `sorted[floor(n * q)]`, clamped to the last element.
    /// Non-finite values are ignored.
    pub fn from_values(values: &[f32]) -> Self {
        let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        let at = |q: f64| sorted[((n as f64 * q).floor() as usize).min(n - 1)];
        let min = sorted[0];
        let max = sorted[n - 1];
        let mean = (sorted.iter().map(|&v| f64::from(v)).sum::<f64>() / n as f64) as f32;

        Self {
            mean: mean.clamp(min, max),
            min,
            max,
            p25: at(0.25),
            p50: at(0.50),
            p75: at(0.75),
            p90: at(0.90),
            p95: at(0.95),
        }
    }
}

/// Snapshot of the fleet scenes around a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetStatistics {
    pub fleet_size: usize,
    pub risk_score: PercentileStats,
    pub safety_score: PercentileStats,
    /// Query-to-neighbor distances.
    pub distance: PercentileStats,
    pub environment: BTreeMap<String, usize>,
    pub weather: BTreeMap<String, usize>,
    pub scenario: BTreeMap<String, usize>,
}

/// Percentile-rank anomaly signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticalSignal {
    /// Share of reference distances strictly below the query's, in [0, 100].
    pub percentile: f32,
    pub is_statistical_anomaly: bool,
    pub reference_size: usize,
}

/// Verdict for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAssessment {
    pub is_anomaly: bool,
    /// In [0, 1]; higher is more anomalous.
    pub anomaly_score: f32,
    /// In [0, 1].
    pub closest_match_similarity: f32,
    pub reason: String,
    pub statistical_context: String,
    pub closest_scene_id: Option<String>,
    pub neighbor_count: usize,
    /// Percentile-rank signal, when a reference distribution was available.
    pub statistical: Option<StatisticalSignal>,
}

impl AnomalyAssessment {
    fn cold_start() -> Self {
        Self {
            is_anomaly: true,
            anomaly_score: 1.0,
            closest_match_similarity: 0.0,
            reason: "Cold start: no comparable fleet scenes in the baseline".to_string(),
            statistical_context: "fleet baseline is empty".to_string(),
            closest_scene_id: None,
            neighbor_count: 0,
            statistical: None,
        }
    }

    fn failed_open(diagnostic: impl Into<String>, neighbor_count: usize) -> Self {
        let diagnostic = diagnostic.into();
        warn!(error = %diagnostic, "Anomaly detection failed open");
        Self {
            is_anomaly: false,
            anomaly_score: 0.0,
            closest_match_similarity: 0.0,
            reason: format!("Anomaly detection unavailable: {}", diagnostic),
            statistical_context: "not computed".to_string(),
            closest_scene_id: None,
            neighbor_count,
            statistical: None,
        }
    }

    /// Whether this verdict came from a fail-open path.
    pub fn is_fail_open(&self) -> bool {
        self.reason.starts_with("Anomaly detection unavailable")
    }
}

/// Assessment plus the statistics of the neighbors it was scored against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneAssessment {
    pub assessment: AnomalyAssessment,
    pub statistics: FleetStatistics,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Scores scenes against the fleet held in an injected vector store.
#[derive(Debug)]
pub struct FleetBaselineEngine<S> {
    store: S,
    config: BaselineConfig,
}

impl<S: VectorStore> FleetBaselineEngine<S> {
    pub fn new(store: S, config: BaselineConfig) -> Self {
        Self { store, config }
    }

    pub fn with_defaults(store: S) -> Self {
        Self::new(store, BaselineConfig::default())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    /// Score a scene from its nearest fleet neighbors (cosine distances).
    ///
    /// The percentile-rank signal uses the neighbors' own nearest-neighbor
    /// distances as reference, which needs neighbor vectors.
    pub fn detect_anomaly(
        &self,
        neighbors: &[NeighborRecord],
        threshold: f32,
    ) -> AnomalyAssessment {
        let reference = reference_distances(neighbors);
        self.assess(neighbors, threshold, &reference)
    }

    /// Like [`detect_anomaly`](Self::detect_anomaly) with a caller-supplied
    /// reference distance distribution.
    pub fn detect_anomaly_with_reference(
        &self,
        neighbors: &[NeighborRecord],
        threshold: f32,
        reference: &[f32],
    ) -> AnomalyAssessment {
        self.assess(neighbors, threshold, reference)
    }

    fn assess(
        &self,
        neighbors: &[NeighborRecord],
        threshold: f32,
        reference: &[f32],
    ) -> AnomalyAssessment {
        if neighbors.is_empty() {
            debug!("Empty fleet baseline; flagging cold-start anomaly");
            return AnomalyAssessment::cold_start();
        }
        if !(0.0..=1.0).contains(&threshold) {
            return AnomalyAssessment::failed_open(
                format!("similarity threshold {} outside [0, 1]", threshold),
                neighbors.len(),
            );
        }

        let (closest_id, closest_distance) = match closest_neighbor(neighbors) {
            Ok(found) => found,
            Err(diagnostic) => return AnomalyAssessment::failed_open(diagnostic, neighbors.len()),
        };

        let closest_match_similarity = (1.0 - closest_distance).clamp(0.0, 1.0);
        let anomaly_score = closest_distance.clamp(0.0, 1.0);
        let is_anomaly = closest_match_similarity < threshold;

        let reason = if is_anomaly {
            format!(
                "Closest fleet match similarity {:.3} is below threshold {:.2}",
                closest_match_similarity, threshold
            )
        } else {
            format!(
                "Closest fleet match similarity {:.3} meets threshold {:.2}",
                closest_match_similarity, threshold
            )
        };
        let statistical_context = format!(
            "Compared against {} fleet scenes; closest {} at cosine distance {:.4}",
            neighbors.len(),
            closest_id,
            closest_distance
        );

        let statistical = self.percentile_rank(closest_distance, reference);

        debug!(
            neighbors = neighbors.len(),
            closest = %closest_id,
            similarity = %format!("{:.4}", closest_match_similarity),
            is_anomaly,
            percentile = ?statistical.map(|s| s.percentile),
            "Anomaly assessment"
        );

        AnomalyAssessment {
            is_anomaly,
            anomaly_score,
            closest_match_similarity,
            reason,
            statistical_context,
            closest_scene_id: Some(closest_id.to_string()),
            neighbor_count: neighbors.len(),
            statistical,
        }
    }

    /// Rank `query_distance` against `reference`.
    ///
    /// `None` for an empty reference or a non-finite query distance.
    pub fn percentile_rank(
        &self,
        query_distance: f32,
        reference: &[f32],
    ) -> Option<StatisticalSignal> {
        let reference: Vec<f32> = reference.iter().copied().filter(|d| d.is_finite()).collect();
        if reference.is_empty() || !query_distance.is_finite() {
            return None;
        }

        let below = reference.iter().filter(|&&d| d < query_distance).count();
        let percentile = 100.0 * below as f32 / reference.len() as f32;
        Some(StatisticalSignal {
            percentile,
            is_statistical_anomaly: percentile >= self.config.statistical_percentile,
            reference_size: reference.len(),
        })
    }

    /// Percentile tables and categorical counts over `neighbors`, skipping
    /// `exclude_scene_id`.
    pub fn fleet_statistics(
        &self,
        neighbors: &[NeighborRecord],
        exclude_scene_id: Option<&str>,
    ) -> FleetStatistics {
        fleet_statistics(neighbors, exclude_scene_id)
    }

    /// Query the store and score a scene against its neighbors.
    ///
    /// The scene itself (by id) is dropped from its neighbors. Store failures
    /// fail open.
    pub fn assess_scene(
        &self,
        space: EmbeddingSpace,
        vector: &[f32],
        scene_id: Option<&str>,
    ) -> SceneAssessment {
        let neighbors = match self.fetch_neighbors(space, vector, self.config.top_k, scene_id) {
            Ok(neighbors) => neighbors,
            Err(diagnostic) => {
                return SceneAssessment {
                    assessment: AnomalyAssessment::failed_open(diagnostic, 0),
                    statistics: FleetStatistics::default(),
                };
            }
        };

        SceneAssessment {
            assessment: self.detect_anomaly(&neighbors, self.config.similarity_threshold),
            statistics: fleet_statistics(&neighbors, None),
        }
    }

    /// Up to `k` fleet scenes nearest to `vector`, excluding `exclude_scene_id`.
    ///
    /// Store failures yield an empty list.
    pub fn similar_scenes(
        &self,
        space: EmbeddingSpace,
        vector: &[f32],
        k: usize,
        exclude_scene_id: Option<&str>,
    ) -> Vec<NeighborRecord> {
        self.fetch_neighbors(space, vector, k, exclude_scene_id)
            .unwrap_or_else(|diagnostic| {
                warn!(error = %diagnostic, "Similar-scene lookup failed open");
                Vec::new()
            })
    }

    fn fetch_neighbors(
        &self,
        space: EmbeddingSpace,
        vector: &[f32],
        k: usize,
        exclude_scene_id: Option<&str>,
    ) -> Result<Vec<NeighborRecord>, String> {
        let request = k.saturating_add(usize::from(exclude_scene_id.is_some()));
        let mut neighbors = self.store.query(space, vector, request).map_err(|e| {
            format!("vector store query on {} failed: {}", space.default_index_name(), e)
        })?;
        // Read after the query so lazily built clients report their own kind.
        let kind = self.store.score_kind();

        neighbors.retain(|n| Some(n.id.as_str()) != exclude_scene_id);
        for n in &mut neighbors {
            n.distance = n.distance.map(|raw| kind.to_distance(raw));
        }
        neighbors.truncate(k);
        Ok(neighbors)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn closest_neighbor(neighbors: &[NeighborRecord]) -> Result<(&str, f32), String> {
    let mut closest: Option<(&str, f32)> = None;
    for n in neighbors {
        let distance = match n.distance {
            Some(d) if d.is_finite() => d,
            Some(d) => return Err(format!("neighbor {} has non-finite distance {}", n.id, d)),
            None => return Err(format!("neighbor {} has no distance", n.id)),
        };
        if closest.map_or(true, |(_, best)| distance < best) {
            closest = Some((n.id.as_str(), distance));
        }
    }
    closest.ok_or_else(|| "no neighbors".to_string())
}

/// Each neighbor's cosine distance to its nearest other neighbor.
///
/// Only neighbors carrying vectors of the most common length take part;
/// fewer than two yields an empty reference.
pub fn reference_distances(neighbors: &[NeighborRecord]) -> Vec<f32> {
    let vectors: Vec<&[f32]> = neighbors
        .iter()
        .filter_map(|n| n.vector.as_deref())
        .filter(|v| !v.is_empty())
        .collect();
    let Some(dim) = vectors.first().map(|v| v.len()) else {
        return Vec::new();
    };
    let vectors: Vec<&[f32]> = vectors.into_iter().filter(|v| v.len() == dim).collect();
    if vectors.len() < 2 {
        return Vec::new();
    }

    (0..vectors.len())
        .map(|i| {
            (0..vectors.len())
                .filter(|&j| j != i)
                .map(|j| cosine_distance(vectors[i], vectors[j]))
                .fold(f32::MAX, f32::min)
        })
        .collect()
}

/// Percentile tables and categorical counts; see [`FleetBaselineEngine::fleet_statistics`].
pub fn fleet_statistics(
    neighbors: &[NeighborRecord],
    exclude_scene_id: Option<&str>,
) -> FleetStatistics {
    let fleet: Vec<&NeighborRecord> = neighbors
        .iter()
        .filter(|n| Some(n.id.as_str()) != exclude_scene_id)
        .collect();

    let unit = |v: Option<f32>| v.filter(|x| x.is_finite()).unwrap_or(0.0);
    let risks: Vec<f32> = fleet.iter().map(|n| unit(n.metadata.risk_score)).collect();
    let safeties: Vec<f32> = fleet.iter().map(|n| unit(n.metadata.safety_score)).collect();
    let distances: Vec<f32> = fleet.iter().filter_map(|n| n.distance).collect();

    FleetStatistics {
        fleet_size: fleet.len(),
        risk_score: PercentileStats::from_values(&risks),
        safety_score: PercentileStats::from_values(&safeties),
        distance: PercentileStats::from_values(&distances),
        environment: category_counts(&fleet, |n| n.metadata.environment.as_deref()),
        weather: category_counts(&fleet, |n| n.metadata.weather.as_deref()),
        scenario: category_counts(&fleet, |n| n.metadata.scenario.as_deref()),
    }
}

fn category_counts<'a, F>(fleet: &[&'a NeighborRecord], field: F) -> BTreeMap<String, usize>
where
    F: Fn(&'a NeighborRecord) -> Option<&'a str>,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for &n in fleet {
        let key = field(n).unwrap_or(UNKNOWN_CATEGORY);
        *counts.entry(key.to_string()).or_insert(0) += 1;
    }
    counts
}
