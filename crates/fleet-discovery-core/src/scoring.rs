//! Per-cluster scoring: risk-adaptive sampling targets, intra-cluster
//! uniqueness and the deterministic fallback label.

use tracing::debug;

use crate::config::ScoringConfig;
use crate::similarity::cosine_distance;

/// Cluster share at or above which a category is "Frequent".
pub const FREQUENT_SHARE: f32 = 0.30;
/// Cluster share at or above which a category is "Common".
pub const COMMON_SHARE: f32 = 0.10;
/// Mean risk at or above which a category is "High" risk.
pub const HIGH_RISK: f32 = 0.70;
/// Mean risk at or above which a category is "Moderate" risk.
pub const MODERATE_RISK: f32 = 0.40;

/// Scores discovered clusters.
///
/// # Example
///
/// ```
/// use fleet_discovery_core::scoring::ClusterScorer;
///
/// let scorer = ClusterScorer::default();
/// assert_eq!(scorer.risk_adaptive_target(&[]), 50);
/// assert_eq!(scorer.risk_adaptive_target(&[1.0, 1.0]), 150);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClusterScorer {
    config: ScoringConfig,
}

impl ClusterScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Minimum sample count for a cluster: `round(base * (1 + multiplier * mean_risk))`.
    ///
    /// Non-finite risks count as 0.0 and the rest are clamped to [0, 1].
    /// An empty slice yields the base size.
    pub fn risk_adaptive_target(&self, risk_scores: &[f32]) -> u32 {
        let base = self.config.base_sample_size;
        if risk_scores.is_empty() {
            return base;
        }

        let mean = risk_scores
            .iter()
            .map(|&r| if r.is_finite() { r.clamp(0.0, 1.0) } else { 0.0 })
            .sum::<f32>()
            / risk_scores.len() as f32;

        let target = (base as f32 * (1.0 + self.config.risk_multiplier * mean)).round();
        (target as u32).max(1)
    }

    /// Mean pairwise cosine distance among members, clamped to [0, 1].
    ///
    /// A single member (or none) is maximally unique at 1.0. Clusters larger
    /// than `uniqueness_sample_limit` are evaluated on an evenly strided sample.
    pub fn uniqueness_score(&self, vectors: &[&[f32]]) -> f32 {
        if vectors.len() <= 1 {
            return 1.0;
        }

        let limit = self.config.uniqueness_sample_limit.max(2);
        let sample: Vec<&[f32]> = if vectors.len() > limit {
            let stride = vectors.len() as f64 / limit as f64;
            debug!(
                members = vectors.len(),
                sample = limit,
                "Sampling cluster members for uniqueness"
            );
            (0..limit)
                .map(|i| vectors[((i as f64 * stride) as usize).min(vectors.len() - 1)])
                .collect()
        } else {
            vectors.to_vec()
        };

        let mut total = 0.0f64;
        let mut pairs = 0usize;
        for i in 0..sample.len() {
            for j in (i + 1)..sample.len() {
                total += f64::from(cosine_distance(sample[i], sample[j]));
                pairs += 1;
            }
        }

        if pairs == 0 {
            return 1.0;
        }
        ((total / pairs as f64) as f32).clamp(0.0, 1.0)
    }

    /// Deterministic label used when no naming collaborator is available.
    pub fn fallback_category_name(
        &self,
        scene_count: usize,
        total_scenes: usize,
        average_risk: f32,
    ) -> String {
        fallback_category_name(scene_count, total_scenes, average_risk)
    }
}

/// `"{Frequent|Common|Rare} {High|Moderate|Low} Risk Scenarios"`.
///
/// # Example
///
/// ```
/// use fleet_discovery_core::scoring::fallback_category_name;
///
/// assert_eq!(fallback_category_name(40, 100, 0.8), "Frequent High Risk Scenarios");
/// assert_eq!(fallback_category_name(2, 100, 0.1), "Rare Low Risk Scenarios");
/// ```
pub fn fallback_category_name(
    scene_count: usize,
    total_scenes: usize,
    average_risk: f32,
) -> String {
    let share = if total_scenes == 0 {
        0.0
    } else {
        scene_count as f32 / total_scenes as f32
    };

    let frequency = if share >= FREQUENT_SHARE {
        "Frequent"
    } else if share >= COMMON_SHARE {
        "Common"
    } else {
        "Rare"
    };

    let risk = if average_risk >= HIGH_RISK {
        "High"
    } else if average_risk >= MODERATE_RISK {
        "Moderate"
    } else {
        "Low"
    };

    format!("{} {} Risk Scenarios", frequency, risk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_target_is_monotonic() {
        let scorer = ClusterScorer::default();
        let mut previous = 0;
        for step in 0..=10 {
            let risk = step as f32 / 10.0;
            let target = scorer.risk_adaptive_target(&[risk, risk]);
            assert!(target >= previous, "risk={} target={} previous={}", risk, target, previous);
            previous = target;
        }
        assert_eq!(scorer.risk_adaptive_target(&[0.0]), 50);
        assert_eq!(scorer.risk_adaptive_target(&[0.5]), 100);
        assert_eq!(scorer.risk_adaptive_target(&[1.0]), 150);

        println!("[PASS] test_risk_target_is_monotonic - max={}", previous);
    }

    #[test]
    fn test_risk_target_sanitizes_scores() {
        let scorer = ClusterScorer::default();
        assert_eq!(scorer.risk_adaptive_target(&[f32::NAN, 3.0]), 100);
    }

    #[test]
    fn test_risk_target_custom_config() {
        let scorer = ClusterScorer::new(ScoringConfig {
            base_sample_size: 10,
            risk_multiplier: 1.0,
            ..ScoringConfig::default()
        });
        assert_eq!(scorer.risk_adaptive_target(&[0.25, 0.75]), 15);
    }

    #[test]
    fn test_uniqueness_singleton_and_identical() {
        let scorer = ClusterScorer::default();
        let v = [1.0f32, 0.0, 0.0];
        assert_eq!(scorer.uniqueness_score(&[&v[..]]), 1.0);
        assert_eq!(scorer.uniqueness_score(&[]), 1.0);
        assert!(scorer.uniqueness_score(&[&v[..], &v[..], &v[..]]) < 1e-6);
    }

    #[test]
    fn test_uniqueness_is_bounded() {
        let scorer = ClusterScorer::default();
        let a = [1.0f32, 0.0];
        let b = [-1.0f32, 0.0];
        let c = [0.0f32, 1.0];
        // Opposite vectors have cosine distance 2.0; the mean is clamped.
        let opposite = scorer.uniqueness_score(&[&a[..], &b[..]]);
        assert_eq!(opposite, 1.0);
        let mixed = scorer.uniqueness_score(&[&a[..], &c[..]]);
        assert!((mixed - 1.0).abs() < 1e-6);

        println!("[PASS] test_uniqueness_is_bounded - opposite={} mixed={}", opposite, mixed);
    }

    #[test]
    fn test_uniqueness_sampling_matches_small_clusters() {
        let scorer = ClusterScorer::new(ScoringConfig {
            uniqueness_sample_limit: 4,
            ..ScoringConfig::default()
        });
        let v = [0.5f32, 0.5];
        let many: Vec<&[f32]> = (0..50).map(|_| &v[..]).collect();
        assert!(scorer.uniqueness_score(&many) < 1e-6);
    }

    #[test]
    fn test_fallback_category_name_thresholds() {
        assert_eq!(fallback_category_name(30, 100, 0.7), "Frequent High Risk Scenarios");
        assert_eq!(fallback_category_name(10, 100, 0.4), "Common Moderate Risk Scenarios");
        assert_eq!(fallback_category_name(9, 100, 0.39), "Rare Low Risk Scenarios");
        assert_eq!(fallback_category_name(0, 0, 0.0), "Rare Low Risk Scenarios");
    }
}
