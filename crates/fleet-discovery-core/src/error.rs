//! Error types for fleet-discovery-core.
//!
//! - [`DiscoveryError`]: structured failure of a clustering run. Every variant
//!   maps to an [`ErrorCategory`] so callers can decide whether to retry with a
//!   different batch or surface the failure to an operator.
//! - [`StoreError`]: failures reported by an external vector store or scene source.
//! - [`NamingError`]: failures reported by an external naming collaborator.
//!
//! Input-quality problems (NaN/Inf, zero-variance features) never reach these
//! types; they are repaired during preprocessing and logged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure category exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Parameters or scalar inputs outside their valid range.
    InvalidValue,
    /// Vectors of inconsistent or unexpected dimensionality.
    DimensionalMismatch,
    /// Matrix could not be reduced to a usable rank.
    RankDeficiency,
    /// Input too large for the pairwise distance matrix.
    Memory,
    /// Internal numerical or structural failure of the clustering algorithm.
    AlgorithmFailure,
    /// Too few scenes to attempt clustering.
    InsufficientData,
    /// Configuration could not be loaded or failed validation.
    Configuration,
}

impl ErrorCategory {
    /// Stable string form of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InvalidValue => "invalid-value",
            ErrorCategory::DimensionalMismatch => "dimensional-mismatch",
            ErrorCategory::RankDeficiency => "rank-deficiency",
            ErrorCategory::Memory => "memory",
            ErrorCategory::AlgorithmFailure => "algorithm-failure",
            ErrorCategory::InsufficientData => "insufficient-data",
            ErrorCategory::Configuration => "configuration",
        }
    }

    /// Whether retrying with a smaller or different batch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Memory | ErrorCategory::RankDeficiency | ErrorCategory::InsufficientData
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during a discovery run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Not enough scenes for clustering.
    #[error("Insufficient data: required {required}, actual {actual}")]
    InsufficientData {
        /// Minimum required scenes
        required: usize,
        /// Actual scenes provided
        actual: usize,
    },

    /// Vector dimension doesn't match the expected dimension.
    #[error("Dimension mismatch: expected {expected}, actual {actual} ({context})")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension provided
        actual: usize,
        /// Where the mismatch was detected
        context: String,
    },

    /// Invalid parameter or scalar input.
    #[error("Invalid value: {message}")]
    InvalidValue {
        /// Description of what's wrong
        message: String,
    },

    /// Reduced matrix is unusable and the un-reduced fallback is too.
    #[error("Rank deficiency: {message}")]
    RankDeficiency {
        /// Description of the degenerate matrix
        message: String,
    },

    /// Input exceeds the configured pairwise-matrix budget.
    #[error("Memory limit exceeded: {scenes} scenes requested, limit is {limit}")]
    MemoryLimit {
        /// Scenes requested
        scenes: usize,
        /// Configured maximum
        limit: usize,
    },

    /// Internal clustering failure.
    #[error("Algorithm failure: {message}")]
    AlgorithmFailure {
        /// Description of the failure
        message: String,
    },

    /// Configuration loading or validation failure.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scene source failed while paging input.
    #[error("Scene source error: {0}")]
    Source(#[from] StoreError),
}

impl DiscoveryError {
    /// Create an InsufficientData error.
    pub fn insufficient_data(required: usize, actual: usize) -> Self {
        Self::InsufficientData { required, actual }
    }

    /// Create a DimensionMismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize, context: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            expected,
            actual,
            context: context.into(),
        }
    }

    /// Create an InvalidValue error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }

    /// Create an AlgorithmFailure error.
    pub fn algorithm_failure(message: impl Into<String>) -> Self {
        Self::AlgorithmFailure {
            message: message.into(),
        }
    }

    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            DiscoveryError::InsufficientData { .. } => ErrorCategory::InsufficientData,
            DiscoveryError::DimensionMismatch { .. } => ErrorCategory::DimensionalMismatch,
            DiscoveryError::InvalidValue { .. } => ErrorCategory::InvalidValue,
            DiscoveryError::RankDeficiency { .. } => ErrorCategory::RankDeficiency,
            DiscoveryError::MemoryLimit { .. } => ErrorCategory::Memory,
            DiscoveryError::AlgorithmFailure { .. } => ErrorCategory::AlgorithmFailure,
            DiscoveryError::Config(_) => ErrorCategory::Configuration,
            DiscoveryError::Source(_) => ErrorCategory::AlgorithmFailure,
        }
    }
}

impl From<config::ConfigError> for DiscoveryError {
    fn from(err: config::ConfigError) -> Self {
        DiscoveryError::Config(err.to_string())
    }
}

/// Errors reported by an external vector store or scene source.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the client could not be built.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with a payload that could not be interpreted.
    #[error("Malformed store response: {0}")]
    MalformedResponse(String),

    /// Query vector has the wrong dimension for the index.
    #[error("Query dimension mismatch for index {index}: expected {expected}, got {actual}")]
    QueryDimension {
        /// Index that rejected the query
        index: String,
        /// Dimension of the index
        expected: usize,
        /// Dimension of the query
        actual: usize,
    },
}

/// Errors reported by a naming collaborator.
#[derive(Debug, Error)]
pub enum NamingError {
    /// Collaborator failed to produce a name.
    #[error("Naming failed: {0}")]
    Failed(String),

    /// Collaborator returned an empty or unusable label.
    #[error("Naming collaborator returned an empty label")]
    EmptyLabel,
}

/// Result alias for discovery operations.
pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;
