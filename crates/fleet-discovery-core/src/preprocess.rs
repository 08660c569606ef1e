//! Vector preprocessing ahead of density clustering.
//!
//! Steps, in order:
//! 1. Replace NaN/Inf with 0.0 (counted and logged)
//! 2. Drop columns whose standard deviation is below `variance_epsilon`
//! 3. Standardize to zero mean / unit variance
//! 4. Keep the fewest principal components explaining `explained_variance`
//!    of the variance; on numerical failure keep the standardized matrix
//! 5. L2-normalize every row, so Euclidean distance tracks cosine distance
//!
//! Eigendecomposition runs on whichever of the Gram (N x N) or covariance
//! (D x D) matrix is smaller; both share the same non-zero spectrum.

use std::cmp::Ordering;

use nalgebra::{DMatrix, Dyn, SymmetricEigen};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PreprocessConfig;
use crate::error::{DiscoveryError, DiscoveryResult};

/// Total variance below this is treated as no variance at all.
const MIN_TOTAL_VARIANCE: f64 = 1e-12;

/// Why the dimensionality reduction step was abandoned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PcaError {
    #[error("no columns survived variance filtering")]
    Empty,

    #[error("scatter matrix contains non-finite values")]
    NonFinite,

    #[error("eigendecomposition did not converge within {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error("total variance {total:e} is too small to decompose")]
    ZeroVariance { total: f64 },
}

/// What preprocessing did to the matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessReport {
    pub input_rows: usize,
    pub input_columns: usize,
    /// NaN/Inf cells replaced with 0.0.
    pub non_finite_replaced: usize,
    /// Columns dropped for near-zero variance.
    pub dropped_columns: usize,
    /// Non-finite values produced by standardization and zeroed.
    pub residual_non_finite: usize,
    pub output_columns: usize,
    /// Principal components kept; `None` when reduction was skipped.
    pub components_kept: Option<usize>,
    /// Fraction of variance explained by the kept components.
    pub explained_variance: Option<f32>,
    /// Reason the un-reduced standardized matrix was used instead.
    pub pca_fallback: Option<String>,
    /// Rows left at zero length during normalization.
    pub zero_norm_rows: usize,
}

/// A matrix ready for clustering.
#[derive(Debug, Clone)]
pub struct PreprocessedMatrix {
    /// Row-per-scene, L2-normalized.
    pub matrix: Array2<f32>,
    pub report: PreprocessReport,
}

/// Result of a preprocessing request.
#[derive(Debug, Clone)]
pub enum PreprocessOutcome {
    /// Matrix is ready for clustering.
    Ready(PreprocessedMatrix),
    /// Too few rows; clustering is not attempted.
    Skipped { rows: usize, required: usize },
}

/// Cleans and conditions raw embedding matrices.
#[derive(Debug, Clone)]
pub struct VectorPreprocessor {
    config: PreprocessConfig,
    min_rows: usize,
}

impl VectorPreprocessor {
    /// Create a preprocessor that skips inputs with fewer than `min_rows` rows.
    pub fn new(config: PreprocessConfig, min_rows: usize) -> Self {
        Self { config, min_rows }
    }

    /// Run the full pipeline on an (N x D) matrix.
    pub fn process(&self, matrix: ArrayView2<'_, f32>) -> DiscoveryResult<PreprocessOutcome> {
        let (rows, columns) = matrix.dim();
        if rows < self.min_rows {
            debug!(
                rows,
                required = self.min_rows,
                "Too few rows for clustering; preprocessing skipped"
            );
            return Ok(PreprocessOutcome::Skipped {
                rows,
                required: self.min_rows,
            });
        }

        let mut report = PreprocessReport {
            input_rows: rows,
            input_columns: columns,
            ..Default::default()
        };

        // 1. Non-finite cleanup
        let mut data = matrix.to_owned();
        for value in data.iter_mut() {
            if !value.is_finite() {
                *value = 0.0;
                report.non_finite_replaced += 1;
            }
        }
        if report.non_finite_replaced > 0 {
            warn!(
                replaced = report.non_finite_replaced,
                rows,
                columns,
                "Replaced non-finite embedding values with 0.0"
            );
        }

        // 2-3. Variance filter + standardization
        let standardized = self.standardize(&data, &mut report);

        // 4. Dimensionality reduction
        let reduced = match principal_components(&standardized, &self.config) {
            Ok(pca) => {
                report.components_kept = Some(pca.components);
                report.explained_variance = Some(pca.explained as f32);
                debug!(
                    components = pca.components,
                    explained = %format!("{:.4}", pca.explained),
                    input_columns = standardized.ncols(),
                    "Principal components selected"
                );
                pca.scores
            }
            Err(PcaError::Empty) => {
                warn!(rows, columns, "Every feature column is constant; nothing to reduce");
                report.pca_fallback = Some(PcaError::Empty.to_string());
                standardized
            }
            Err(e) => {
                warn!(error = %e, "Dimensionality reduction failed; using standardized matrix");
                report.pca_fallback = Some(e.to_string());
                standardized
            }
        };

        // 5. Row normalization
        let output = normalize_rows(&reduced, &mut report);
        if output.iter().any(|v| !v.is_finite()) {
            return Err(DiscoveryError::RankDeficiency {
                message: "preprocessed matrix contains non-finite values after all fallbacks"
                    .into(),
            });
        }
        report.output_columns = output.ncols();

        debug!(
            rows,
            input_columns = columns,
            output_columns = report.output_columns,
            dropped = report.dropped_columns,
            "Preprocessing complete"
        );

        Ok(PreprocessOutcome::Ready(PreprocessedMatrix {
            matrix: output,
            report,
        }))
    }

    fn standardize(&self, data: &Array2<f32>, report: &mut PreprocessReport) -> Array2<f64> {
        let rows = data.nrows();
        let epsilon = f64::from(self.config.variance_epsilon);

        let mut kept: Vec<(usize, f64, f64)> = Vec::with_capacity(data.ncols());
        for (j, column) in data.axis_iter(Axis(1)).enumerate() {
            let mean = column.iter().map(|&v| f64::from(v)).sum::<f64>() / rows as f64;
            let variance = column
                .iter()
                .map(|&v| {
                    let d = f64::from(v) - mean;
                    d * d
                })
                .sum::<f64>()
                / rows as f64;
            let std = variance.sqrt();
            if std >= epsilon && std > 0.0 {
                kept.push((j, mean, std));
            }
        }
        report.dropped_columns = data.ncols() - kept.len();
        if report.dropped_columns > 0 {
            debug!(
                dropped = report.dropped_columns,
                kept = kept.len(),
                "Dropped near-constant feature columns"
            );
        }

        let mut standardized = Array2::<f64>::zeros((rows, kept.len()));
        for (k, &(j, mean, std)) in kept.iter().enumerate() {
            for i in 0..rows {
                let z = (f64::from(data[[i, j]]) - mean) / std;
                standardized[[i, k]] = if z.is_finite() {
                    z
                } else {
                    report.residual_non_finite += 1;
                    0.0
                };
            }
        }
        if report.residual_non_finite > 0 {
            warn!(
                count = report.residual_non_finite,
                "Standardization produced non-finite values; zeroed"
            );
        }
        standardized
    }
}

/// Reduced matrix plus the bookkeeping needed for the report.
struct PcaResult {
    scores: Array2<f64>,
    components: usize,
    explained: f64,
}

fn principal_components(
    x: &Array2<f64>,
    config: &PreprocessConfig,
) -> Result<PcaResult, PcaError> {
    let (n, d) = x.dim();
    if n.min(d) == 0 {
        return Err(PcaError::Empty);
    }

    let use_gram = n <= d;
    let scatter = if use_gram { x.dot(&x.t()) } else { x.t().dot(x) };
    if scatter.iter().any(|v| !v.is_finite()) {
        return Err(PcaError::NonFinite);
    }

    let eigen = symmetric_eigen(&scatter, config.max_eigen_iterations)?;
    let values = &eigen.eigenvalues;

    // nalgebra leaves the spectrum unordered.
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).unwrap_or(Ordering::Equal));

    let total: f64 = values.iter().map(|v| v.max(0.0)).sum();
    if !(total > MIN_TOTAL_VARIANCE) {
        return Err(PcaError::ZeroVariance { total });
    }

    let target = f64::from(config.explained_variance);
    let mut components = 0;
    let mut cumulative = 0.0;
    for &idx in &order {
        cumulative += values[idx].max(0.0);
        components += 1;
        if cumulative / total >= target - 1e-12 {
            break;
        }
    }

    let mut scores = Array2::<f64>::zeros((n, components));
    for (c, &idx) in order.iter().take(components).enumerate() {
        let vector = eigen.eigenvectors.column(idx);
        if use_gram {
            // X = U S W^T, so the projection X W equals U S.
            let singular = values[idx].max(0.0).sqrt();
            for i in 0..n {
                scores[[i, c]] = vector[i] * singular;
            }
        } else {
            for (i, row) in x.axis_iter(Axis(0)).enumerate() {
                scores[[i, c]] = row.iter().zip(vector.iter()).map(|(a, b)| a * b).sum();
            }
        }
    }

    Ok(PcaResult {
        scores,
        components,
        explained: (cumulative / total).min(1.0),
    })
}

/// Eigendecomposition of a symmetric scatter matrix.
///
/// Eigenvectors are the columns of `eigenvectors`, matching `eigenvalues`
/// by index.
fn symmetric_eigen(
    scatter: &Array2<f64>,
    max_iterations: usize,
) -> Result<SymmetricEigen<f64, Dyn>, PcaError> {
    let side = scatter.nrows();
    let matrix = DMatrix::from_fn(side, side, |i, j| scatter[[i, j]]);
    let eigen = SymmetricEigen::try_new(matrix, f64::EPSILON, max_iterations).ok_or(
        PcaError::NotConverged {
            iterations: max_iterations,
        },
    )?;
    if eigen.eigenvalues.iter().any(|v| !v.is_finite()) {
        return Err(PcaError::NonFinite);
    }
    Ok(eigen)
}

fn normalize_rows(matrix: &Array2<f64>, report: &mut PreprocessReport) -> Array2<f32> {
    let (rows, cols) = matrix.dim();
    let mut output = Array2::<f32>::zeros((rows, cols));
    for (i, row) in matrix.axis_iter(Axis(0)).enumerate() {
        let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 && norm.is_finite() {
            for (j, v) in row.iter().enumerate() {
                output[[i, j]] = (v / norm) as f32;
            }
        } else {
            report.zero_norm_rows += 1;
        }
    }
    if report.zero_norm_rows > 0 && cols > 0 {
        debug!(rows = report.zero_norm_rows, "Rows with zero norm left unnormalized");
    }
    output
}

/// Stack equal-length rows into a matrix.
///
/// # Errors
///
/// `DiscoveryError::DimensionMismatch` naming the first offending row.
pub fn stack_rows<'a, I>(rows: I, expected_dim: Option<usize>) -> DiscoveryResult<Array2<f32>>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let rows: Vec<(&str, &[f32])> = rows.into_iter().collect();
    let dim = match (expected_dim, rows.first()) {
        (Some(d), _) => d,
        (None, Some((_, first))) => first.len(),
        (None, None) => 0,
    };

    let mut matrix = Array2::<f32>::zeros((rows.len(), dim));
    for (i, (id, row)) in rows.iter().enumerate() {
        if row.len() != dim {
            return Err(DiscoveryError::dimension_mismatch(
                dim,
                row.len(),
                format!("vector of scene {}", id),
            ));
        }
        for (j, &v) in row.iter().enumerate() {
            matrix[[i, j]] = v;
        }
    }
    Ok(matrix)
}
