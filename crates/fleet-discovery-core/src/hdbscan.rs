//! HDBSCAN clustering parameters and clusterer implementation.
//!
//! HDBSCAN = Hierarchical Density-Based Spatial Clustering of Applications with Noise
//!
//! # Algorithm
//!
//! 1. Compute core distances (distance to the `min_samples`-th nearest neighbor)
//! 2. Mutual reachability: MR(a,b) = max(core_dist(a), core_dist(b), dist(a,b))
//! 3. Minimum spanning tree over MR using Prim's algorithm
//! 4. Single-linkage hierarchy from the sorted MST edges (Union-Find)
//! 5. Condense the hierarchy: splits where a side has fewer than
//!    `min_cluster_size` points are "points falling out", not new clusters
//! 6. Select clusters by Excess of Mass (or leaves), never the root
//! 7. Merge selected clusters born closer than `cluster_selection_epsilon`
//!
//! The root is never selected, so a dataset with no density structure yields
//! zero clusters and every point is noise.

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DiscoveryError, DiscoveryResult};
use crate::similarity::cosine_distance;

/// Label assigned to points outside every cluster.
pub const NOISE_LABEL: i32 = -1;

/// Linkage distances are floored here so lambda = 1/distance stays finite.
const MIN_LINKAGE_DISTANCE: f64 = 1e-12;

/// Cluster selection method for HDBSCAN.
///
/// # Example
///
/// ```
/// use fleet_discovery_core::hdbscan::ClusterSelectionMethod;
///
/// let method = ClusterSelectionMethod::default();
/// assert_eq!(method, ClusterSelectionMethod::EOM);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClusterSelectionMethod {
    /// Excess of Mass - default, good general purpose.
    /// Selects clusters based on persistence in the hierarchy.
    #[default]
    EOM,
    /// Leaf clusters only - more granular clustering.
    Leaf,
}

impl ClusterSelectionMethod {
    /// Get description of this method.
    pub fn description(&self) -> &'static str {
        match self {
            ClusterSelectionMethod::EOM => "Excess of Mass - good general purpose clustering",
            ClusterSelectionMethod::Leaf => "Leaf clusters only - more granular clustering",
        }
    }
}

/// Point-to-point distance used by the clusterer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Straight-line distance; on L2-normalized rows this orders pairs
    /// exactly as cosine distance does.
    #[default]
    Euclidean,
    /// 1 - cosine similarity.
    Cosine,
}

/// Parameters for HDBSCAN clustering algorithm.
///
/// # Example
///
/// ```
/// use fleet_discovery_core::hdbscan::HDBSCANParams;
///
/// let params = HDBSCANParams::default();
/// assert_eq!(params.min_cluster_size, 5);
/// assert_eq!(params.min_samples, 3);
/// assert!(params.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HDBSCANParams {
    /// Minimum number of points to form a cluster.
    pub min_cluster_size: usize,

    /// Neighbors counted when computing a point's core distance.
    pub min_samples: usize,

    /// Selected clusters born below this distance are replaced by their parent.
    pub cluster_selection_epsilon: f32,

    /// Method for selecting clusters from hierarchy.
    pub cluster_selection_method: ClusterSelectionMethod,

    /// Distance metric to use.
    pub metric: DistanceMetric,
}

impl Default for HDBSCANParams {
    fn default() -> Self {
        Self {
            min_cluster_size: 5,
            min_samples: 3,
            cluster_selection_epsilon: 0.1,
            cluster_selection_method: ClusterSelectionMethod::EOM,
            metric: DistanceMetric::Euclidean,
        }
    }
}

impl HDBSCANParams {
    /// Params for a given minimum cluster size, with min_samples = max(3, size / 2).
    pub fn for_min_cluster_size(min_cluster_size: usize) -> Self {
        Self {
            min_cluster_size,
            min_samples: (min_cluster_size / 2).max(3),
            ..Self::default()
        }
    }

    /// Set minimum cluster size.
    ///
    /// Value is NOT automatically clamped - use validate() to check.
    #[must_use]
    pub fn with_min_cluster_size(mut self, size: usize) -> Self {
        self.min_cluster_size = size;
        self
    }

    /// Set minimum samples.
    #[must_use]
    pub fn with_min_samples(mut self, samples: usize) -> Self {
        self.min_samples = samples;
        self
    }

    /// Set cluster selection epsilon.
    #[must_use]
    pub fn with_selection_epsilon(mut self, epsilon: f32) -> Self {
        self.cluster_selection_epsilon = epsilon;
        self
    }

    /// Set cluster selection method.
    #[must_use]
    pub fn with_selection_method(mut self, method: ClusterSelectionMethod) -> Self {
        self.cluster_selection_method = method;
        self
    }

    /// Set distance metric.
    #[must_use]
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Validate parameters.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::InvalidValue` if:
    /// - min_cluster_size < 2
    /// - min_samples < 1
    /// - cluster_selection_epsilon is negative or non-finite
    pub fn validate(&self) -> DiscoveryResult<()> {
        if self.min_cluster_size < 2 {
            return Err(DiscoveryError::invalid_value(format!(
                "min_cluster_size must be >= 2, got {}. \
                 HDBSCAN requires at least 2 points to form a cluster.",
                self.min_cluster_size
            )));
        }

        if self.min_samples < 1 {
            return Err(DiscoveryError::invalid_value(format!(
                "min_samples must be >= 1, got {}. \
                 At least 1 sample is required for core point determination.",
                self.min_samples
            )));
        }

        if !(self.cluster_selection_epsilon >= 0.0 && self.cluster_selection_epsilon.is_finite()) {
            return Err(DiscoveryError::invalid_value(format!(
                "cluster_selection_epsilon must be finite and >= 0, got {}",
                self.cluster_selection_epsilon
            )));
        }

        Ok(())
    }

    /// Check if these params will work for a given data size.
    #[inline]
    pub fn is_viable_for_size(&self, n_points: usize) -> bool {
        n_points >= self.min_cluster_size
    }
}

/// Per-point output of a clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct HdbscanLabels {
    /// Cluster label per point, `NOISE_LABEL` for noise. Labels are dense from 0.
    pub labels: Vec<i32>,
    /// Membership strength per point in [0, 1]; 0.0 for noise.
    pub probabilities: Vec<f32>,
    pub cluster_count: usize,
    /// Silhouette over non-noise points, 0.0 when fewer than 2 clusters.
    pub silhouette: f32,
}

impl HdbscanLabels {
    /// Number of points labeled noise.
    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == NOISE_LABEL).count()
    }
}

/// Node of the single-linkage hierarchy. Ids below n are points.
#[derive(Debug, Clone, Copy)]
struct LinkageNode {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

/// Edge of the condensed tree. `child < n_points` is a point falling out,
/// otherwise a cluster label.
#[derive(Debug, Clone, Copy)]
struct CondensedEdge {
    parent: usize,
    child: usize,
    lambda: f64,
    size: usize,
}

/// HDBSCAN clusterer for batch density-based clustering.
///
/// # Example
///
/// ```
/// use fleet_discovery_core::hdbscan::{HDBSCANClusterer, HDBSCANParams};
/// use ndarray::array;
///
/// let params = HDBSCANParams::default()
///     .with_min_cluster_size(2)
///     .with_min_samples(1);
/// let clusterer = HDBSCANClusterer::new(params);
/// let points = array![[0.0f32, 0.0], [0.0, 0.01], [5.0, 5.0], [5.0, 5.01]];
/// let result = clusterer.fit(points.view()).unwrap();
/// assert_eq!(result.cluster_count, 2);
/// ```
#[derive(Debug, Clone)]
pub struct HDBSCANClusterer {
    params: HDBSCANParams,
}

impl HDBSCANClusterer {
    /// Create a new HDBSCAN clusterer with specified parameters.
    pub fn new(params: HDBSCANParams) -> Self {
        Self { params }
    }

    /// Create a clusterer with default parameters.
    pub fn with_defaults() -> Self {
        Self::new(HDBSCANParams::default())
    }

    /// Parameters in use.
    pub fn params(&self) -> &HDBSCANParams {
        &self.params
    }

    /// Fit the clusterer to row-per-point data.
    ///
    /// # Errors
    ///
    /// - `InvalidValue` for bad params or non-finite input
    /// - `InsufficientData` if fewer points than min_cluster_size
    /// - `AlgorithmFailure` if the hierarchy cannot be built
    pub fn fit(&self, points: ArrayView2<'_, f32>) -> DiscoveryResult<HdbscanLabels> {
        self.params.validate()?;

        let n = points.nrows();
        if n < self.params.min_cluster_size {
            return Err(DiscoveryError::insufficient_data(
                self.params.min_cluster_size,
                n,
            ));
        }
        if points.iter().any(|v| !v.is_finite()) {
            return Err(DiscoveryError::invalid_value(
                "clustering input contains non-finite values",
            ));
        }

        // Step 1: Pairwise distances, shared by core distances, MST and silhouette
        let distances = self.pairwise_distances(points);

        // Step 2: Core distances
        let core_distances = self.compute_core_distances(&distances, n);

        // Step 3: MST over mutual reachability
        let mst = self.build_mst(&distances, &core_distances, n);
        if mst.iter().any(|&(_, _, w)| !w.is_finite()) {
            return Err(DiscoveryError::algorithm_failure(
                "minimum spanning tree contains non-finite edge weights",
            ));
        }

        // Step 4: Single-linkage hierarchy
        let hierarchy = single_linkage(&mst, n)?;

        // Step 5: Condensed tree
        let condensed = condense_tree(&hierarchy, n, self.params.min_cluster_size);

        // Step 6-7: Cluster selection
        let selected = self.select_clusters(&condensed, n);

        let (labels, probabilities, cluster_count) = label_points(&condensed, &selected, n);
        let silhouette = compute_silhouette_with_distance(n, &labels, |i, j| distances[i * n + j]);

        debug!(
            points = n,
            clusters = cluster_count,
            noise = labels.iter().filter(|&&l| l == NOISE_LABEL).count(),
            condensed_clusters = selected.len(),
            silhouette = %format!("{:.4}", silhouette),
            "HDBSCAN fit complete"
        );

        Ok(HdbscanLabels {
            labels,
            probabilities,
            cluster_count,
            silhouette,
        })
    }

    /// Flattened row-major n x n distance matrix.
    fn pairwise_distances(&self, points: ArrayView2<'_, f32>) -> Vec<f32> {
        let n = points.nrows();
        let rows: Vec<Vec<f32>> = points.outer_iter().map(|row| row.to_vec()).collect();
        let mut distances = vec![0.0f32; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = self.point_distance(&rows[i], &rows[j]);
                distances[i * n + j] = d;
                distances[j * n + i] = d;
            }
        }
        distances
    }

    /// Compute core distances (distance to k-th nearest neighbor).
    ///
    /// Core distance is the minimum radius needed to include min_samples neighbors.
    fn compute_core_distances(&self, distances: &[f32], n: usize) -> Vec<f32> {
        let k = self.params.min_samples;
        let mut core_distances = Vec::with_capacity(n);

        for i in 0..n {
            let mut row: Vec<f32> = (0..n)
                .filter(|&j| j != i)
                .map(|j| distances[i * n + j])
                .collect();

            row.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

            // Core distance is distance to k-th nearest (0-indexed: k-1)
            let core_dist = if k <= row.len() {
                row[k - 1]
            } else {
                row.last().copied().unwrap_or(0.0)
            };

            core_distances.push(core_dist);
        }

        core_distances
    }

    /// Build minimum spanning tree over mutual reachability using Prim's algorithm.
    ///
    /// MR(a,b) = max(core_dist(a), core_dist(b), dist(a,b)) is evaluated on the fly.
    /// Returns edges sorted by weight: (node_a, node_b, weight)
    fn build_mst(
        &self,
        distances: &[f32],
        core_distances: &[f32],
        n: usize,
    ) -> Vec<(usize, usize, f64)> {
        if n == 0 {
            return vec![];
        }

        let mutual_reach = |i: usize, j: usize| -> f64 {
            f64::from(
                distances[i * n + j]
                    .max(core_distances[i])
                    .max(core_distances[j]),
            )
        };

        let mut in_tree = vec![false; n];
        let mut edges = Vec::with_capacity(n.saturating_sub(1));
        let mut min_dist = vec![f64::MAX; n];
        let mut min_edge = vec![0usize; n];

        // Start from node 0
        in_tree[0] = true;
        for j in 1..n {
            min_dist[j] = mutual_reach(0, j);
            min_edge[j] = 0;
        }

        for _ in 1..n {
            // Find minimum distance node not in tree
            let mut min_val = f64::MAX;
            let mut min_idx = usize::MAX;

            for j in 0..n {
                if !in_tree[j] && (min_idx == usize::MAX || min_dist[j] < min_val) {
                    min_val = min_dist[j];
                    min_idx = j;
                }
            }

            in_tree[min_idx] = true;
            edges.push((min_edge[min_idx], min_idx, min_val));

            for j in 0..n {
                if !in_tree[j] {
                    let mr = mutual_reach(min_idx, j);
                    if mr < min_dist[j] {
                        min_dist[j] = mr;
                        min_edge[j] = min_idx;
                    }
                }
            }
        }

        // Sort edges by weight for hierarchical processing
        edges.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(Ordering::Equal));

        debug!(
            mst_edges = edges.len(),
            min_weight = %format!("{:.4}", edges.first().map(|e| e.2).unwrap_or(0.0)),
            max_weight = %format!("{:.4}", edges.last().map(|e| e.2).unwrap_or(0.0)),
            metric = ?self.params.metric,
            "MST edge weight distribution"
        );

        edges
    }

    /// Pick clusters from the condensed tree. Returns cluster indices
    /// (label - n_points), never the root (index 0).
    fn select_clusters(&self, tree: &[CondensedEdge], n: usize) -> Vec<usize> {
        let cluster_total = tree
            .iter()
            .filter(|e| e.child >= n)
            .map(|e| e.child - n + 1)
            .max()
            .unwrap_or(1);

        let mut parent_of = vec![usize::MAX; cluster_total];
        let mut birth = vec![0.0f64; cluster_total];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); cluster_total];
        for e in tree.iter().filter(|e| e.child >= n) {
            let c = e.child - n;
            let p = e.parent - n;
            parent_of[c] = p;
            birth[c] = e.lambda;
            children[p].push(c);
        }

        let mut stability = vec![0.0f64; cluster_total];
        for e in tree {
            let p = e.parent - n;
            stability[p] += (e.lambda - birth[p]) * e.size as f64;
        }

        let mut selected = vec![false; cluster_total];
        match self.params.cluster_selection_method {
            ClusterSelectionMethod::EOM => {
                for c in 1..cluster_total {
                    selected[c] = true;
                }
                // Children always carry larger labels than their parent.
                for c in (1..cluster_total).rev() {
                    let child_sum: f64 = children[c].iter().map(|&ch| stability[ch]).sum();
                    if child_sum > stability[c] {
                        selected[c] = false;
                        stability[c] = child_sum;
                    } else {
                        for d in descendants(&children, c) {
                            selected[d] = false;
                        }
                    }
                }
            }
            ClusterSelectionMethod::Leaf => {
                for c in 1..cluster_total {
                    selected[c] = children[c].is_empty();
                }
            }
        }

        let epsilon = f64::from(self.params.cluster_selection_epsilon);
        if epsilon > 0.0 {
            let chosen: Vec<usize> = (1..cluster_total).filter(|&c| selected[c]).collect();
            let mut merged = vec![false; cluster_total];
            let mut absorbed: HashSet<usize> = HashSet::new();
            for c in chosen {
                if absorbed.contains(&c) {
                    continue;
                }
                let birth_distance = 1.0 / birth[c];
                let target = if birth_distance < epsilon {
                    traverse_upwards(&parent_of, &birth, c, epsilon)
                } else {
                    c
                };
                if absorbed.contains(&target) {
                    continue;
                }
                merged[target] = true;
                for d in descendants(&children, target) {
                    merged[d] = false;
                    absorbed.insert(d);
                }
            }
            if merged != selected {
                debug!(
                    epsilon = %format!("{:.4}", epsilon),
                    before = selected.iter().filter(|&&s| s).count(),
                    after = merged.iter().filter(|&&s| s).count(),
                    "Cluster selection epsilon merged near-identical clusters"
                );
            }
            selected = merged;
        }

        (1..cluster_total).filter(|&c| selected[c]).collect()
    }

    /// Compute distance between two points using the configured metric.
    fn point_distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.params.metric {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            DistanceMetric::Cosine => cosine_distance(a, b),
        }
    }
}

/// Walk up from `leaf` to the first ancestor born at or beyond `epsilon`.
/// Stops below the root.
fn traverse_upwards(parent_of: &[usize], birth: &[f64], leaf: usize, epsilon: f64) -> usize {
    let mut current = leaf;
    loop {
        let parent = parent_of[current];
        if parent == 0 || parent == usize::MAX {
            return current;
        }
        if 1.0 / birth[parent] > epsilon {
            return parent;
        }
        current = parent;
    }
}

fn descendants(children: &[Vec<usize>], cluster: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack: Vec<usize> = children[cluster].clone();
    while let Some(c) = stack.pop() {
        out.push(c);
        stack.extend(children[c].iter().copied());
    }
    out
}

/// Build the single-linkage hierarchy from ascending MST edges.
fn single_linkage(mst: &[(usize, usize, f64)], n: usize) -> DiscoveryResult<Vec<LinkageNode>> {
    fn find(parent: &mut [usize], i: usize) -> usize {
        let mut root = i;
        while parent[root] != root {
            root = parent[root];
        }
        let mut cur = i;
        while parent[cur] != root {
            let next = parent[cur];
            parent[cur] = root;
            cur = next;
        }
        root
    }

    let mut parent: Vec<usize> = (0..n).collect();
    let mut node_of: Vec<usize> = (0..n).collect();
    let mut sizes: Vec<usize> = vec![1; n];
    let mut nodes = Vec::with_capacity(n.saturating_sub(1));

    for &(a, b, distance) in mst {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        if ra == rb {
            return Err(DiscoveryError::algorithm_failure(format!(
                "spanning tree edge ({}, {}) closes a cycle",
                a, b
            )));
        }
        let left = node_of[ra];
        let right = node_of[rb];
        let size = sizes[ra] + sizes[rb];
        nodes.push(LinkageNode {
            left,
            right,
            distance,
            size,
        });

        parent[ra] = rb;
        sizes[rb] = size;
        node_of[rb] = n + nodes.len() - 1;
    }

    if nodes.len() + 1 != n {
        return Err(DiscoveryError::algorithm_failure(format!(
            "hierarchy has {} merges for {} points",
            nodes.len(),
            n
        )));
    }
    Ok(nodes)
}

fn node_size(nodes: &[LinkageNode], n: usize, id: usize) -> usize {
    if id < n {
        1
    } else {
        nodes[id - n].size
    }
}

fn leaves(nodes: &[LinkageNode], n: usize, id: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![id];
    while let Some(node) = stack.pop() {
        if node < n {
            out.push(node);
        } else {
            let link = nodes[node - n];
            stack.push(link.left);
            stack.push(link.right);
        }
    }
    out
}

/// Condense the hierarchy, treating splits into a side smaller than
/// `min_cluster_size` as points leaving the parent cluster.
///
/// Cluster labels start at `n` (the root) and increase breadth-first.
fn condense_tree(nodes: &[LinkageNode], n: usize, min_cluster_size: usize) -> Vec<CondensedEdge> {
    let mut edges = Vec::new();
    if nodes.is_empty() {
        return edges;
    }

    let root = n + nodes.len() - 1;
    let mut relabel = vec![0usize; root + 1];
    relabel[root] = n;
    let mut next_label = n + 1;

    let mut queue = VecDeque::from([root]);
    while let Some(node) = queue.pop_front() {
        if node < n {
            continue;
        }
        let link = nodes[node - n];
        let lambda = 1.0 / link.distance.max(MIN_LINKAGE_DISTANCE);
        let parent = relabel[node];
        let left_size = node_size(nodes, n, link.left);
        let right_size = node_size(nodes, n, link.right);

        let fall_out = |child: usize, edges: &mut Vec<CondensedEdge>| {
            for point in leaves(nodes, n, child) {
                edges.push(CondensedEdge {
                    parent,
                    child: point,
                    lambda,
                    size: 1,
                });
            }
        };

        match (left_size >= min_cluster_size, right_size >= min_cluster_size) {
            (true, true) => {
                for (child, size) in [(link.left, left_size), (link.right, right_size)] {
                    relabel[child] = next_label;
                    edges.push(CondensedEdge {
                        parent,
                        child: next_label,
                        lambda,
                        size,
                    });
                    next_label += 1;
                    queue.push_back(child);
                }
            }
            (false, false) => {
                fall_out(link.left, &mut edges);
                fall_out(link.right, &mut edges);
            }
            (true, false) => {
                relabel[link.left] = parent;
                queue.push_back(link.left);
                fall_out(link.right, &mut edges);
            }
            (false, true) => {
                relabel[link.right] = parent;
                queue.push_back(link.right);
                fall_out(link.left, &mut edges);
            }
        }
    }

    edges
}

/// Map points to dense labels of the selected clusters and compute
/// membership probabilities.
fn label_points(
    tree: &[CondensedEdge],
    selected: &[usize],
    n: usize,
) -> (Vec<i32>, Vec<f32>, usize) {
    let cluster_total = tree
        .iter()
        .filter(|e| e.child >= n)
        .map(|e| e.child - n + 1)
        .max()
        .unwrap_or(1);

    let mut parent_of = vec![0usize; cluster_total];
    for e in tree.iter().filter(|e| e.child >= n) {
        parent_of[e.child - n] = e.parent - n;
    }

    let mut dense = vec![NOISE_LABEL; cluster_total];
    for (label, &c) in selected.iter().enumerate() {
        dense[c] = label as i32;
    }

    // Owner = nearest selected ancestor-or-self; parents precede children.
    let mut owner = vec![NOISE_LABEL; cluster_total];
    for c in 1..cluster_total {
        owner[c] = if dense[c] != NOISE_LABEL {
            dense[c]
        } else {
            owner[parent_of[c]]
        };
    }

    let mut labels = vec![NOISE_LABEL; n];
    let mut point_lambda = vec![0.0f64; n];
    for e in tree.iter().filter(|e| e.child < n) {
        labels[e.child] = owner[e.parent - n];
        point_lambda[e.child] = e.lambda;
    }

    let mut max_lambda = vec![0.0f64; selected.len()];
    for p in 0..n {
        if labels[p] != NOISE_LABEL {
            let slot = labels[p] as usize;
            max_lambda[slot] = max_lambda[slot].max(point_lambda[p]);
        }
    }

    let probabilities = (0..n)
        .map(|p| {
            if labels[p] == NOISE_LABEL {
                0.0
            } else {
                let max = max_lambda[labels[p] as usize];
                if max > 0.0 {
                    (point_lambda[p].min(max) / max) as f32
                } else {
                    1.0
                }
            }
        })
        .collect();

    (labels, probabilities, selected.len())
}

/// Silhouette score with pluggable distance function.
///
/// Ranges from -1.0 (poor) to 1.0 (excellent); 0.0 with fewer than 2 clusters.
pub fn compute_silhouette_with_distance<F>(n: usize, labels: &[i32], distance: F) -> f32
where
    F: Fn(usize, usize) -> f32,
{
    if n < 2 || labels.len() != n {
        return 0.0;
    }

    let clusters: HashSet<i32> = labels.iter().filter(|&&l| l != NOISE_LABEL).copied().collect();
    if clusters.len() < 2 {
        return 0.0;
    }

    let mut total_silhouette = 0.0;
    let mut count = 0;

    for i in 0..n {
        if labels[i] == NOISE_LABEL {
            continue;
        }

        // a(i) = mean distance to same cluster
        let (same_sum, same_count) = (0..n)
            .filter(|&j| j != i && labels[j] == labels[i])
            .fold((0.0f32, 0usize), |(sum, cnt), j| (sum + distance(i, j), cnt + 1));

        let a_i = if same_count > 0 {
            same_sum / same_count as f32
        } else {
            0.0
        };

        // b(i) = min mean distance to other clusters
        let b_i = clusters
            .iter()
            .filter(|&&cluster| cluster != labels[i])
            .filter_map(|&cluster| {
                let (sum, cnt) = (0..n)
                    .filter(|&j| labels[j] == cluster)
                    .fold((0.0f32, 0usize), |(sum, cnt), j| (sum + distance(i, j), cnt + 1));
                if cnt > 0 {
                    Some(sum / cnt as f32)
                } else {
                    None
                }
            })
            .fold(f32::MAX, f32::min);

        let b_i = if b_i == f32::MAX { 0.0 } else { b_i };

        let max_ab = a_i.max(b_i);
        let s_i = if max_ab > 0.0 {
            (b_i - a_i) / max_ab
        } else {
            0.0
        };

        total_silhouette += s_i;
        count += 1;
    }

    if count > 0 {
        total_silhouette / count as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn blob(center: (f32, f32), count: usize, spread: f32, offset: usize) -> Vec<[f32; 2]> {
        (0..count)
            .map(|i| {
                let angle = (i + offset) as f32 * 2.399;
                let r = spread * (1.0 + (i % 3) as f32) / 3.0;
                [center.0 + r * angle.cos(), center.1 + r * angle.sin()]
            })
            .collect()
    }

    fn to_matrix(points: &[[f32; 2]]) -> Array2<f32> {
        let mut m = Array2::<f32>::zeros((points.len(), 2));
        for (i, p) in points.iter().enumerate() {
            m[[i, 0]] = p[0];
            m[[i, 1]] = p[1];
        }
        m
    }

    // =========================================================================
    // PARAMETER TESTS
    // =========================================================================

    #[test]
    fn test_default_params() {
        let params = HDBSCANParams::default();
        assert_eq!(params.min_cluster_size, 5);
        assert_eq!(params.min_samples, 3);
        assert!((params.cluster_selection_epsilon - 0.1).abs() < f32::EPSILON);
        assert_eq!(params.cluster_selection_method, ClusterSelectionMethod::EOM);
        assert_eq!(params.metric, DistanceMetric::Euclidean);
        assert!(params.validate().is_ok());

        println!("[PASS] test_default_params");
    }

    #[test]
    fn test_for_min_cluster_size_derives_min_samples() {
        assert_eq!(HDBSCANParams::for_min_cluster_size(5).min_samples, 3);
        assert_eq!(HDBSCANParams::for_min_cluster_size(12).min_samples, 6);
        assert_eq!(HDBSCANParams::for_min_cluster_size(2).min_samples, 3);
    }

    #[test]
    fn test_validation_rejects_min_cluster_size_below_2() {
        let params = HDBSCANParams::default().with_min_cluster_size(1);
        let err_msg = params.validate().expect_err("must reject").to_string();
        assert!(err_msg.contains("min_cluster_size"));
        assert!(err_msg.contains("2"));

        println!("[PASS] test_validation_rejects_min_cluster_size_below_2 - error: {}", err_msg);
    }

    #[test]
    fn test_validation_rejects_min_samples_zero() {
        let params = HDBSCANParams::default().with_min_samples(0);
        let err_msg = params.validate().expect_err("must reject").to_string();
        assert!(err_msg.contains("min_samples"));
    }

    #[test]
    fn test_validation_rejects_negative_epsilon() {
        let params = HDBSCANParams::default().with_selection_epsilon(-0.5);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_is_viable_for_size() {
        let params = HDBSCANParams::default();
        assert!(!params.is_viable_for_size(4));
        assert!(params.is_viable_for_size(5));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let params = HDBSCANParams::default()
            .with_min_cluster_size(7)
            .with_selection_method(ClusterSelectionMethod::Leaf)
            .with_metric(DistanceMetric::Cosine);

        let json = serde_json::to_string(&params).expect("serialize must succeed");
        let restored: HDBSCANParams =
            serde_json::from_str(&json).expect("deserialize must succeed");
        assert_eq!(params, restored);

        println!("[PASS] test_serialization_roundtrip - JSON: {}", json);
    }

    #[test]
    fn test_cluster_selection_method_description() {
        assert_ne!(
            ClusterSelectionMethod::EOM.description(),
            ClusterSelectionMethod::Leaf.description()
        );
    }

    // =========================================================================
    // FIT TESTS
    // =========================================================================

    #[test]
    fn test_fit_two_separated_blobs() {
        let mut points = blob((0.0, 0.0), 8, 0.2, 0);
        points.extend(blob((10.0, 10.0), 8, 0.2, 3));
        let m = to_matrix(&points);

        let clusterer = HDBSCANClusterer::with_defaults();
        let result = clusterer.fit(m.view()).expect("fit");

        assert_eq!(result.cluster_count, 2, "labels: {:?}", result.labels);
        let first = result.labels[0];
        let second = result.labels[8];
        assert_ne!(first, NOISE_LABEL);
        assert_ne!(second, NOISE_LABEL);
        assert_ne!(first, second);
        assert!(result.labels[..8].iter().all(|&l| l == first));
        assert!(result.labels[8..].iter().all(|&l| l == second));
        assert!(result.silhouette > 0.9);
        assert!(result.probabilities.iter().all(|&p| (0.0..=1.0).contains(&p)));

        println!(
            "[PASS] test_fit_two_separated_blobs - labels={:?} silhouette={:.3}",
            result.labels, result.silhouette
        );
    }

    #[test]
    fn test_fit_single_blob_yields_no_clusters() {
        let points = blob((1.0, 1.0), 8, 0.1, 0);
        let m = to_matrix(&points);

        let result = HDBSCANClusterer::with_defaults().fit(m.view()).expect("fit");
        assert_eq!(result.cluster_count, 0);
        assert_eq!(result.noise_count(), 8);
        assert_eq!(result.silhouette, 0.0);

        println!("[PASS] test_fit_single_blob_yields_no_clusters");
    }

    #[test]
    fn test_fit_identical_points_yields_no_clusters() {
        let m = Array2::<f32>::from_elem((10, 3), 0.5);
        let result = HDBSCANClusterer::with_defaults().fit(m.view()).expect("fit");
        assert_eq!(result.cluster_count, 0);
    }

    #[test]
    fn test_fit_outlier_is_noise() {
        let mut points = blob((0.0, 0.0), 6, 0.1, 0);
        points.extend(blob((5.0, 0.0), 6, 0.1, 1));
        points.push([50.0, 50.0]);
        let m = to_matrix(&points);

        let result = HDBSCANClusterer::with_defaults().fit(m.view()).expect("fit");
        assert_eq!(result.cluster_count, 2);
        assert_eq!(result.labels[12], NOISE_LABEL);
        assert_eq!(result.probabilities[12], 0.0);
    }

    #[test]
    fn test_fit_rejects_too_few_points() {
        let m = Array2::<f32>::zeros((3, 2));
        let err = HDBSCANClusterer::with_defaults().fit(m.view()).expect_err("too few");
        assert!(matches!(err, DiscoveryError::InsufficientData { required: 5, actual: 3 }));
    }

    #[test]
    fn test_fit_rejects_non_finite_input() {
        let mut m = Array2::<f32>::zeros((6, 2));
        m[[2, 1]] = f32::NAN;
        let err = HDBSCANClusterer::with_defaults().fit(m.view()).expect_err("nan");
        assert_eq!(err.category(), crate::error::ErrorCategory::InvalidValue);
    }

    #[test]
    fn test_large_epsilon_merges_into_parent_not_root() {
        // Three blobs: two close together, one far away.
        let mut points = blob((0.0, 0.0), 6, 0.05, 0);
        points.extend(blob((1.0, 0.0), 6, 0.05, 1));
        points.extend(blob((20.0, 0.0), 6, 0.05, 2));
        let m = to_matrix(&points);

        let fine = HDBSCANClusterer::new(
            HDBSCANParams::default()
                .with_selection_method(ClusterSelectionMethod::Leaf)
                .with_selection_epsilon(0.0),
        )
        .fit(m.view())
        .expect("fit");
        assert_eq!(fine.cluster_count, 3, "labels: {:?}", fine.labels);

        let merged = HDBSCANClusterer::new(
            HDBSCANParams::default()
                .with_selection_method(ClusterSelectionMethod::Leaf)
                .with_selection_epsilon(5.0),
        )
        .fit(m.view())
        .expect("fit");
        assert_eq!(merged.cluster_count, 2, "labels: {:?}", merged.labels);
        assert_eq!(merged.labels[0], merged.labels[6]);
        assert_ne!(merged.labels[0], merged.labels[12]);

        println!(
            "[PASS] test_large_epsilon_merges_into_parent_not_root - fine={} merged={}",
            fine.cluster_count, merged.cluster_count
        );
    }

    #[test]
    fn test_silhouette_requires_two_clusters() {
        let labels = vec![0, 0, 0, NOISE_LABEL];
        assert_eq!(compute_silhouette_with_distance(4, &labels, |_, _| 1.0), 0.0);
    }
}
