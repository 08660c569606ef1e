//! Embedding spaces a scene can be represented in.

use serde::{Deserialize, Serialize};

/// An embedding space, carrying its own dimension and default index name.
///
/// # Example
///
/// ```
/// use fleet_discovery_core::EmbeddingSpace;
///
/// assert_eq!(EmbeddingSpace::Behavioral.dimension(), 1536);
/// assert_eq!(EmbeddingSpace::Visual.default_index_name(), "visual-embeddings");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingSpace {
    /// Driving-behavior / semantic scene content.
    #[default]
    Behavioral,
    /// Raw visual / video content.
    Visual,
    /// Older single-space embeddings kept for historical indexes.
    Legacy,
}

impl EmbeddingSpace {
    /// Native dimension of vectors in this space.
    pub const fn dimension(&self) -> usize {
        match self {
            EmbeddingSpace::Behavioral => 1536,
            EmbeddingSpace::Visual => 768,
            EmbeddingSpace::Legacy => 1024,
        }
    }

    /// Index the vector store keeps this space under.
    pub const fn default_index_name(&self) -> &'static str {
        match self {
            EmbeddingSpace::Behavioral => "behavioral-embeddings",
            EmbeddingSpace::Visual => "visual-embeddings",
            EmbeddingSpace::Legacy => "scene-embeddings",
        }
    }

    /// All spaces.
    pub fn all() -> [EmbeddingSpace; 3] {
        [
            EmbeddingSpace::Behavioral,
            EmbeddingSpace::Visual,
            EmbeddingSpace::Legacy,
        ]
    }
}

impl std::fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EmbeddingSpace::Behavioral => "behavioral",
            EmbeddingSpace::Visual => "visual",
            EmbeddingSpace::Legacy => "legacy",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_and_indexes_are_distinct() {
        let dims: Vec<usize> = EmbeddingSpace::all().iter().map(|s| s.dimension()).collect();
        assert_eq!(dims, vec![1536, 768, 1024]);

        let mut names: Vec<&str> = EmbeddingSpace::all()
            .iter()
            .map(|s| s.default_index_name())
            .collect();
        names.dedup();
        assert_eq!(names.len(), 3);

        println!("[PASS] test_dimensions_and_indexes_are_distinct - dims={:?}", dims);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&EmbeddingSpace::Visual).expect("serialize");
        assert_eq!(json, "\"visual\"");
        let restored: EmbeddingSpace = serde_json::from_str("\"legacy\"").expect("deserialize");
        assert_eq!(restored, EmbeddingSpace::Legacy);
        assert_eq!(EmbeddingSpace::default(), EmbeddingSpace::Behavioral);
    }
}
