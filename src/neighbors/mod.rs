//! Nearest neighbour search over feature descriptors.
//!
//! Matching only needs two capabilities: build an index over the descriptors
//! of image 1, then query it with the descriptors of image 2. Backends
//! implement [`IndexBuilder`] and [`NeighborIndex`]; [`IndexChoice`] picks one
//! at configuration time and [`IndexCache`] keeps recently built indices.

mod brute_force;
mod cache;
#[cfg(feature = "usearch")]
mod hnsw;

pub use brute_force::{BruteForceBuilder, BruteForceIndex};
pub use cache::IndexCache;
#[cfg(feature = "usearch")]
pub use hnsw::{UsearchBuilder, UsearchIndex};

use std::hash::{Hash, Hasher};

use crate::error::SverError;
use crate::settings::IndexKind;

/// Row-major matrix of `f32` descriptors, one row per keypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptors {
    data: Vec<f32>,
    dim: usize,
}

impl Descriptors {
    pub fn new(data: Vec<f32>, dim: usize) -> Result<Self, SverError> {
        if dim == 0 || data.len() % dim != 0 {
            return Err(SverError::DescriptorDimension {
                expected: dim,
                got: data.len(),
            });
        }
        Ok(Self { data, dim })
    }

    /// Build from rows, which must all have the same length.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self, SverError> {
        let dim = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(dim * rows.len());
        for row in rows {
            let row = row.as_ref();
            if row.len() != dim {
                return Err(SverError::DescriptorDimension {
                    expected: dim,
                    got: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Self::new(data, dim)
    }

    /// SIFT-style byte descriptors.
    pub fn from_u8(data: &[u8], dim: usize) -> Result<Self, SverError> {
        Self::new(data.iter().map(|&b| b as f32).collect(), dim)
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim)
    }

    /// Hash of the dimension and the bit patterns of every value.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.dim.hash(&mut hasher);
        self.data.len().hash(&mut hasher);
        for v in &self.data {
            v.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// `k` nearest neighbours of each query, nearest first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Neighbors {
    /// `indices[q][j]` is the index row of the `j`-th neighbour of query `q`.
    pub indices: Vec<Vec<usize>>,
    /// Squared distances, aligned with `indices`.
    pub dists: Vec<Vec<f64>>,
}

impl Neighbors {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of neighbours per query (the smallest row length).
    pub fn k(&self) -> usize {
        self.indices.iter().map(Vec::len).min().unwrap_or(0)
    }

    /// Divide every distance by `pseudo_max_dist_sqrd`.
    pub fn normalized(mut self, pseudo_max_dist_sqrd: f64) -> Self {
        for row in &mut self.dists {
            for d in row {
                *d /= pseudo_max_dist_sqrd;
            }
        }
        self
    }
}

/// A built index over a fixed set of descriptors.
pub trait NeighborIndex: Send + Sync {
    fn dim(&self) -> usize;

    /// Number of indexed descriptors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `k` nearest indexed descriptors of every query row, by squared L2.
    fn knn(&self, queries: &Descriptors, k: usize) -> Result<Neighbors, SverError>;
}

/// Builds a [`NeighborIndex`] over descriptors.
pub trait IndexBuilder: Send + Sync {
    fn name(&self) -> &'static str;

    fn build(&self, data: &Descriptors) -> Result<Box<dyn NeighborIndex>, SverError>;
}

/// Runtime backend selection, with a `Dyn` escape hatch for custom backends.
pub enum IndexChoice {
    BruteForce(BruteForceBuilder),
    #[cfg(feature = "usearch")]
    Usearch(UsearchBuilder),
    Dyn(Box<dyn IndexBuilder>),
}

impl Default for IndexChoice {
    fn default() -> Self {
        IndexChoice::BruteForce(BruteForceBuilder)
    }
}

impl std::fmt::Debug for IndexChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("IndexChoice").field(&self.name()).finish()
    }
}

impl IndexChoice {
    /// Backend named by configuration.
    pub fn from_kind(kind: IndexKind) -> Result<Self, SverError> {
        match kind {
            IndexKind::BruteForce => Ok(IndexChoice::BruteForce(BruteForceBuilder)),
            #[cfg(feature = "usearch")]
            IndexKind::Usearch => Ok(IndexChoice::Usearch(UsearchBuilder::default())),
            #[cfg(not(feature = "usearch"))]
            IndexKind::Usearch => Err(SverError::IndexBackend(
                "usearch backend requested but the `usearch` feature is disabled".into(),
            )),
        }
    }
}

impl IndexBuilder for IndexChoice {
    fn name(&self) -> &'static str {
        match self {
            IndexChoice::BruteForce(b) => b.name(),
            #[cfg(feature = "usearch")]
            IndexChoice::Usearch(b) => b.name(),
            IndexChoice::Dyn(b) => b.name(),
        }
    }

    fn build(&self, data: &Descriptors) -> Result<Box<dyn NeighborIndex>, SverError> {
        match self {
            IndexChoice::BruteForce(b) => b.build(data),
            #[cfg(feature = "usearch")]
            IndexChoice::Usearch(b) => b.build(data),
            IndexChoice::Dyn(b) => b.build(data),
        }
    }
}

/// Query `index` and normalize the squared distances.
///
/// Fails when the index holds fewer than `k` descriptors.
pub fn normalized_nearest_neighbors(
    index: &dyn NeighborIndex,
    queries: &Descriptors,
    k: usize,
    pseudo_max_dist_sqrd: f64,
) -> Result<Neighbors, SverError> {
    if index.len() < k {
        return Err(SverError::NotEnoughNeighbors {
            required: k,
            got: index.len(),
        });
    }
    if !queries.is_empty() && queries.dim() != index.dim() {
        return Err(SverError::DescriptorDimension {
            expected: index.dim(),
            got: queries.dim(),
        });
    }
    Ok(index.knn(queries, k)?.normalized(pseudo_max_dist_sqrd))
}
