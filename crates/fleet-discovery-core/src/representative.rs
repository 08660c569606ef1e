//! Representative member selection by similarity to a cluster centroid.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, DiscoveryResult};
use crate::similarity::cosine_similarity;
use crate::space::EmbeddingSpace;
use crate::types::{DiscoveredCluster, SceneEmbedding};

/// A member chosen as representative, with its similarity to the centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentativeScene {
    /// Position of the member in the slice it was selected from.
    pub index: usize,
    pub scene_id: String,
    pub similarity: f32,
}

/// Ranks cluster members by cosine similarity to the centroid.
#[derive(Debug, Clone)]
pub struct RepresentativeSelector {
    default_k: usize,
}

impl Default for RepresentativeSelector {
    fn default() -> Self {
        Self::new(5)
    }
}

impl RepresentativeSelector {
    pub fn new(default_k: usize) -> Self {
        Self { default_k }
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Top `k` members by similarity to `centroid`, descending; ties keep input order.
    ///
    /// `members` pairs each scene id with its vector in the centroid's space.
    /// Fewer members than `k` returns all of them.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if any member vector differs in length from the centroid.
    pub fn top_k(
        &self,
        centroid: &[f32],
        members: &[(&str, &[f32])],
        k: usize,
    ) -> DiscoveryResult<Vec<RepresentativeScene>> {
        let mut ranked = Vec::with_capacity(members.len());
        for (index, (scene_id, vector)) in members.iter().enumerate() {
            if vector.len() != centroid.len() {
                return Err(DiscoveryError::dimension_mismatch(
                    centroid.len(),
                    vector.len(),
                    format!("representative candidate {}", scene_id),
                ));
            }
            ranked.push(RepresentativeScene {
                index,
                scene_id: (*scene_id).to_string(),
                similarity: cosine_similarity(centroid, vector),
            });
        }

        // Stable sort keeps input order for equal similarities.
        ranked.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal));
        ranked.truncate(k);
        Ok(ranked)
    }

    /// Single closest member; the sole member when there is one, `None` when empty.
    pub fn most_representative(
        &self,
        centroid: &[f32],
        members: &[(&str, &[f32])],
    ) -> DiscoveryResult<Option<RepresentativeScene>> {
        if members.len() == 1 {
            let (scene_id, vector) = members[0];
            return Ok(Some(RepresentativeScene {
                index: 0,
                scene_id: scene_id.to_string(),
                similarity: cosine_similarity(centroid, vector),
            }));
        }
        Ok(self.top_k(centroid, members, 1)?.into_iter().next())
    }

    /// Representatives of a discovered cluster in the given space.
    ///
    /// Returned indices refer to positions in `scenes`.
    pub fn for_cluster(
        &self,
        cluster: &DiscoveredCluster,
        scenes: &[SceneEmbedding],
        space: EmbeddingSpace,
    ) -> DiscoveryResult<Vec<RepresentativeScene>> {
        let (positions, members) = cluster_members(cluster, scenes, space);
        let ranked = self.top_k(cluster.centroid(space), &members, self.default_k)?;
        Ok(ranked
            .into_iter()
            .map(|mut r| {
                r.index = positions[r.index];
                r
            })
            .collect())
    }

    /// Most representative scene of a discovered cluster in the given space.
    pub fn most_representative_for_cluster(
        &self,
        cluster: &DiscoveredCluster,
        scenes: &[SceneEmbedding],
        space: EmbeddingSpace,
    ) -> DiscoveryResult<Option<RepresentativeScene>> {
        let (positions, members) = cluster_members(cluster, scenes, space);
        let best = self.most_representative(cluster.centroid(space), &members)?;
        Ok(best.map(|mut r| {
            r.index = positions[r.index];
            r
        }))
    }
}

fn cluster_members<'a>(
    cluster: &DiscoveredCluster,
    scenes: &'a [SceneEmbedding],
    space: EmbeddingSpace,
) -> (Vec<usize>, Vec<(&'a str, &'a [f32])>) {
    let mut positions = Vec::with_capacity(cluster.member_indices.len());
    let mut members = Vec::with_capacity(cluster.member_indices.len());
    for &i in &cluster.member_indices {
        if let Some(scene) = scenes.get(i) {
            if let Some(vector) = scene.vector(space) {
                positions.push(i);
                members.push((scene.scene_id.as_str(), vector));
            }
        }
    }
    (positions, members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_orders_by_similarity() {
        let selector = RepresentativeSelector::default();
        let centroid = [1.0f32, 0.0];
        let far = [0.0f32, 1.0];
        let near = [1.0f32, 0.1];
        let exact = [2.0f32, 0.0];
        let members: Vec<(&str, &[f32])> =
            vec![("far", &far[..]), ("near", &near[..]), ("exact", &exact[..])];

        let ranked = selector.top_k(&centroid, &members, 2).expect("rank");
        let ids: Vec<&str> = ranked.iter().map(|r| r.scene_id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
        assert_eq!(ranked[0].index, 2);

        println!("[PASS] test_top_k_orders_by_similarity - {:?}", ids);
    }

    #[test]
    fn test_top_k_ties_keep_input_order() {
        let selector = RepresentativeSelector::default();
        let centroid = [1.0f32, 1.0];
        let v = [3.0f32, 3.0];
        let members: Vec<(&str, &[f32])> = vec![("a", &v[..]), ("b", &v[..]), ("c", &v[..])];
        let ranked = selector.top_k(&centroid, &members, 10).expect("rank");
        let ids: Vec<&str> = ranked.iter().map(|r| r.scene_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_top_k_dimension_mismatch() {
        let selector = RepresentativeSelector::default();
        let short = [1.0f32];
        let members: Vec<(&str, &[f32])> = vec![("short", &short[..])];
        let err = selector.top_k(&[1.0, 0.0], &members, 1).expect_err("mismatch");
        assert!(matches!(err, DiscoveryError::DimensionMismatch { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn test_most_representative_edge_cases() {
        let selector = RepresentativeSelector::default();
        assert!(selector.most_representative(&[1.0], &[]).expect("empty").is_none());

        let zero = [0.0f32, 0.0];
        let members: Vec<(&str, &[f32])> = vec![("only", &zero[..])];
        let only = selector
            .most_representative(&[1.0, 0.0], &members)
            .expect("single")
            .expect("some");
        assert_eq!(only.scene_id, "only");
    }
}
