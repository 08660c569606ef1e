//! Scene and cluster records shared across the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::space::EmbeddingSpace;

/// Cluster id reserved for the global fallback cluster.
pub const GLOBAL_FALLBACK_CLUSTER_ID: u32 = 0;

/// One observed scene with its parallel embeddings.
///
/// Produced by the ingestion pipeline; the core only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEmbedding {
    /// Unique scene identifier.
    pub scene_id: String,

    /// Behavioral / semantic embedding.
    pub behavioral_vector: Vec<f32>,

    /// Visual embedding.
    pub visual_vector: Vec<f32>,

    /// Historical single-space embedding, present on older scenes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_vector: Option<Vec<f32>>,

    /// Risk score in [0, 1].
    #[serde(default)]
    pub risk_score: f32,

    /// Safety score in [0, 1].
    #[serde(default)]
    pub safety_score: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
}

impl SceneEmbedding {
    /// Create a scene with both vectors and neutral scores.
    pub fn new(
        scene_id: impl Into<String>,
        behavioral_vector: Vec<f32>,
        visual_vector: Vec<f32>,
    ) -> Self {
        Self {
            scene_id: scene_id.into(),
            behavioral_vector,
            visual_vector,
            legacy_vector: None,
            risk_score: 0.0,
            safety_score: 0.0,
            description: None,
            environment: None,
            weather: None,
            scenario: None,
        }
    }

    /// Set risk and safety scores.
    #[must_use]
    pub fn with_scores(mut self, risk_score: f32, safety_score: f32) -> Self {
        self.risk_score = risk_score;
        self.safety_score = safety_score;
        self
    }

    /// Set categorical tags.
    #[must_use]
    pub fn with_tags(
        mut self,
        environment: Option<&str>,
        weather: Option<&str>,
        scenario: Option<&str>,
    ) -> Self {
        self.environment = environment.map(str::to_string);
        self.weather = weather.map(str::to_string);
        self.scenario = scenario.map(str::to_string);
        self
    }

    /// Vector for the given space, if the scene carries one.
    pub fn vector(&self, space: EmbeddingSpace) -> Option<&[f32]> {
        match space {
            EmbeddingSpace::Behavioral => Some(&self.behavioral_vector),
            EmbeddingSpace::Visual => Some(&self.visual_vector),
            EmbeddingSpace::Legacy => self.legacy_vector.as_deref(),
        }
    }

    /// Risk score with non-finite values treated as 0.0 and the rest clamped to [0, 1].
    pub fn sanitized_risk(&self) -> f32 {
        sanitize_unit(self.risk_score)
    }

    /// Safety score with non-finite values treated as 0.0 and the rest clamped to [0, 1].
    pub fn sanitized_safety(&self) -> f32 {
        sanitize_unit(self.safety_score)
    }
}

fn sanitize_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// How a cluster was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    /// Found by density-based clustering.
    DensityClustering,
    /// Single all-inclusive cluster for a homogeneous fleet.
    GlobalFallback,
}

/// A natural grouping of scenes found in one discovery run.
///
/// Members are referenced by position in the scene slice the run was given
/// (`member_indices`) and by id (`scene_ids`), both in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredCluster {
    /// 1-based for density clusters, 0 for the global fallback.
    pub cluster_id: u32,

    /// Positions of the member scenes in the input slice.
    pub member_indices: Vec<usize>,

    /// Ids of the member scenes.
    pub scene_ids: Vec<String>,

    pub scene_count: usize,

    pub average_risk_score: f32,

    pub average_safety_score: f32,

    /// Mean pairwise cosine distance among members, in [0, 1].
    pub uniqueness_score: f32,

    /// Minimum sample count for downstream curation.
    pub risk_adaptive_target: u32,

    /// Mean of the raw behavioral vectors of the members.
    pub centroid_behavioral: Vec<f32>,

    /// Mean of the raw visual vectors of the members.
    pub centroid_visual: Vec<f32>,

    /// Mean of the legacy vectors of the members that carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid_legacy: Option<Vec<f32>>,

    pub discovery_method: DiscoveryMethod,

    /// Mean HDBSCAN membership probability (1.0 for the fallback).
    pub mean_membership_probability: f32,

    /// Human-readable label; replaced by the naming collaborator when available.
    pub category_name: String,

    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredCluster {
    /// Whether this is the all-inclusive fallback cluster.
    #[inline]
    pub fn is_global_fallback(&self) -> bool {
        self.discovery_method == DiscoveryMethod::GlobalFallback
    }

    /// Iterate the member scenes from the slice the run was given.
    ///
    /// Indices outside the slice are skipped.
    pub fn members<'a>(
        &'a self,
        scenes: &'a [SceneEmbedding],
    ) -> impl Iterator<Item = &'a SceneEmbedding> + 'a {
        self.member_indices.iter().filter_map(move |&i| scenes.get(i))
    }

    /// Centroid for the given space.
    ///
    /// Empty for `Legacy` when no member carries a legacy vector.
    pub fn centroid(&self, space: EmbeddingSpace) -> &[f32] {
        match space {
            EmbeddingSpace::Behavioral => &self.centroid_behavioral,
            EmbeddingSpace::Visual => &self.centroid_visual,
            EmbeddingSpace::Legacy => self.centroid_legacy.as_deref().unwrap_or(&[]),
        }
    }

    /// Replace the category name.
    pub fn set_category_name(&mut self, name: impl Into<String>) {
        self.category_name = name.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_deserializes_with_missing_optional_fields() {
        let json = r#"{
            "scene_id": "scene-1",
            "behavioral_vector": [0.1, 0.2],
            "visual_vector": [0.3]
        }"#;
        let scene: SceneEmbedding = serde_json::from_str(json).expect("deserialize");

        assert_eq!(scene.scene_id, "scene-1");
        assert_eq!(scene.risk_score, 0.0);
        assert!(scene.environment.is_none());
        assert!(scene.vector(EmbeddingSpace::Legacy).is_none());
        assert_eq!(scene.vector(EmbeddingSpace::Visual), Some(&[0.3f32][..]));

        println!("[PASS] test_scene_deserializes_with_missing_optional_fields");
    }

    #[test]
    fn test_sanitized_scores() {
        let scene = SceneEmbedding::new("s", vec![1.0], vec![1.0]).with_scores(f32::NAN, 1.7);
        assert_eq!(scene.sanitized_risk(), 0.0);
        assert_eq!(scene.sanitized_safety(), 1.0);
    }

    #[test]
    fn test_discovery_method_serialization() {
        let json = serde_json::to_string(&DiscoveryMethod::GlobalFallback).expect("serialize");
        assert_eq!(json, "\"global_fallback\"");
        let json = serde_json::to_string(&DiscoveryMethod::DensityClustering).expect("serialize");
        assert_eq!(json, "\"density_clustering\"");
    }
}
