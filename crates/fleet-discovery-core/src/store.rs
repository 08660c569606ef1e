//! Collaborator contracts for vector storage and scene paging.
//!
//! # Overview
//!
//! The core never talks to a concrete vector database. It consumes:
//! - [`VectorStore`]: nearest-neighbor queries against one index per
//!   [`EmbeddingSpace`]
//! - [`SceneSource`]: paged access to full scene records for batch discovery
//!
//! [`InMemoryVectorStore`] is a brute-force implementation of both, used by
//! the CLI and tests. [`LazyVectorStore`] wraps any store behind a
//! once-initialized, thread-safe handle so client construction is deferred
//! until the first query.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::similarity::cosine_distance;
use crate::space::EmbeddingSpace;
use crate::types::SceneEmbedding;

// ============================================================================
// RECORDS
// ============================================================================

/// Metadata attached to a stored vector. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborMetadata {
    pub risk_score: Option<f32>,
    pub safety_score: Option<f32>,
    pub environment: Option<String>,
    pub weather: Option<String>,
    pub scenario: Option<String>,
}

impl NeighborMetadata {
    /// Metadata carried by a scene record.
    pub fn from_scene(scene: &SceneEmbedding) -> Self {
        Self {
            risk_score: Some(scene.risk_score),
            safety_score: Some(scene.safety_score),
            environment: scene.environment.clone(),
            weather: scene.weather.clone(),
            scenario: scene.scenario.clone(),
        }
    }
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborRecord {
    pub id: String,
    /// Score reported by the store; interpret with [`VectorStore::score_kind`].
    #[serde(default)]
    pub distance: Option<f32>,
    /// The stored vector, when the store returns it.
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: NeighborMetadata,
}

impl NeighborRecord {
    pub fn new(id: impl Into<String>, distance: f32) -> Self {
        Self {
            id: id.into(),
            distance: Some(distance),
            vector: None,
            metadata: NeighborMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: NeighborMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// What the `distance` field of a store's neighbors actually holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    /// Cosine distance in [0, 2]; smaller is closer.
    #[default]
    CosineDistance,
    /// Cosine similarity in [-1, 1]; larger is closer.
    CosineSimilarity,
}

impl ScoreKind {
    /// Convert a raw score into cosine distance.
    #[inline]
    pub fn to_distance(self, raw: f32) -> f32 {
        match self {
            ScoreKind::CosineDistance => raw,
            ScoreKind::CosineSimilarity => 1.0 - raw,
        }
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Nearest-neighbor query contract.
pub trait VectorStore: Send + Sync {
    /// Up to `top_k` nearest stored vectors to `vector` in `space`'s index,
    /// closest first.
    fn query(
        &self,
        space: EmbeddingSpace,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<NeighborRecord>, StoreError>;

    /// How to read [`NeighborRecord::distance`].
    fn score_kind(&self) -> ScoreKind {
        ScoreKind::CosineDistance
    }
}

impl<S: VectorStore + ?Sized> VectorStore for Arc<S> {
    fn query(
        &self,
        space: EmbeddingSpace,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<NeighborRecord>, StoreError> {
        (**self).query(space, vector, top_k)
    }

    fn score_kind(&self) -> ScoreKind {
        (**self).score_kind()
    }
}

/// Paged access to scene records.
pub trait SceneSource: Send + Sync {
    /// Up to `limit` scenes starting at `offset`. An empty page ends the stream.
    fn fetch_scenes(&self, offset: usize, limit: usize) -> Result<Vec<SceneEmbedding>, StoreError>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Brute-force store over scenes held in memory.
///
/// Every space is searched by exact cosine distance. Neighbors carry their
/// vectors and scene metadata.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    scenes: RwLock<Vec<SceneEmbedding>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_scenes(scenes: Vec<SceneEmbedding>) -> Self {
        info!(scenes = scenes.len(), "In-memory vector store loaded");
        Self {
            scenes: RwLock::new(scenes),
        }
    }

    /// Add a scene, replacing any stored scene with the same id.
    pub fn insert(&self, scene: SceneEmbedding) {
        let mut scenes = self.scenes.write();
        match scenes.iter().position(|s| s.scene_id == scene.scene_id) {
            Some(pos) => scenes[pos] = scene,
            None => scenes.push(scene),
        }
    }

    /// Remove a scene by id. Returns whether it was present.
    pub fn remove(&self, scene_id: &str) -> bool {
        let mut scenes = self.scenes.write();
        let before = scenes.len();
        scenes.retain(|s| s.scene_id != scene_id);
        scenes.len() != before
    }

    pub fn len(&self) -> usize {
        self.scenes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.read().is_empty()
    }

    /// Clone of a stored scene.
    pub fn get(&self, scene_id: &str) -> Option<SceneEmbedding> {
        self.scenes
            .read()
            .iter()
            .find(|s| s.scene_id == scene_id)
            .cloned()
    }

    /// Snapshot of every stored scene, in insertion order.
    pub fn snapshot(&self) -> Vec<SceneEmbedding> {
        self.scenes.read().clone()
    }
}

impl VectorStore for InMemoryVectorStore {
    fn query(
        &self,
        space: EmbeddingSpace,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<NeighborRecord>, StoreError> {
        let scenes = self.scenes.read();

        let stored_dim = scenes.iter().find_map(|s| s.vector(space).map(<[f32]>::len));
        if let Some(expected) = stored_dim {
            if expected != vector.len() {
                return Err(StoreError::QueryDimension {
                    index: space.default_index_name().to_string(),
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let mut hits: Vec<NeighborRecord> = scenes
            .iter()
            .filter_map(|scene| {
                let stored = scene.vector(space)?;
                if stored.len() != vector.len() {
                    return None;
                }
                Some(
                    NeighborRecord::new(scene.scene_id.clone(), cosine_distance(vector, stored))
                        .with_vector(stored.to_vec())
                        .with_metadata(NeighborMetadata::from_scene(scene)),
                )
            })
            .collect();

        hits.sort_by(|a, b| {
            let da = a.distance.unwrap_or(f32::MAX);
            let db = b.distance.unwrap_or(f32::MAX);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);

        debug!(
            index = space.default_index_name(),
            top_k,
            returned = hits.len(),
            "In-memory nearest-neighbor query"
        );
        Ok(hits)
    }
}

impl SceneSource for InMemoryVectorStore {
    fn fetch_scenes(&self, offset: usize, limit: usize) -> Result<Vec<SceneEmbedding>, StoreError> {
        let scenes = self.scenes.read();
        Ok(scenes.iter().skip(offset).take(limit).cloned().collect())
    }
}

// ============================================================================
// LAZY HANDLE
// ============================================================================

type StoreInit<S> = Box<dyn Fn() -> Result<S, StoreError> + Send + Sync>;

/// Store client built on first use and shared afterwards.
///
/// A failed initialization is returned to the caller and retried on the next
/// query.
pub struct LazyVectorStore<S> {
    cell: OnceCell<S>,
    init: StoreInit<S>,
}

impl<S: VectorStore> LazyVectorStore<S> {
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> Result<S, StoreError> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            init: Box::new(init),
        }
    }

    /// The client, building it if needed.
    pub fn get(&self) -> Result<&S, StoreError> {
        self.cell.get_or_try_init(|| {
            debug!("Initializing vector store client");
            (self.init)()
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<S> fmt::Debug for LazyVectorStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyVectorStore")
            .field("initialized", &self.cell.get().is_some())
            .finish()
    }
}

impl<S: VectorStore> VectorStore for LazyVectorStore<S> {
    fn query(
        &self,
        space: EmbeddingSpace,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<NeighborRecord>, StoreError> {
        self.get()?.query(space, vector, top_k)
    }

    fn score_kind(&self) -> ScoreKind {
        self.cell
            .get()
            .map(|store| store.score_kind())
            .unwrap_or_default()
    }
}
