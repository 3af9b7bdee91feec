use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::{Descriptors, IndexBuilder, NeighborIndex, Neighbors};
use crate::error::SverError;

/// Builds an approximate [`UsearchIndex`] (HNSW, squared L2).
#[derive(Debug, Clone, Copy, Default)]
pub struct UsearchBuilder {
    /// Graph connectivity; `0` keeps the library default.
    pub connectivity: usize,
    /// Search breadth; `0` keeps the library default.
    pub expansion_search: usize,
}

impl IndexBuilder for UsearchBuilder {
    fn name(&self) -> &'static str {
        "usearch"
    }

    fn build(&self, data: &Descriptors) -> Result<Box<dyn NeighborIndex>, SverError> {
        let options = IndexOptions {
            dimensions: data.dim(),
            metric: MetricKind::L2sq,
            quantization: ScalarKind::F32,
            connectivity: self.connectivity,
            expansion_search: self.expansion_search,
            ..Default::default()
        };
        let index = Index::new(&options).map_err(backend)?;
        index.reserve(data.len()).map_err(backend)?;
        for (i, row) in data.rows().enumerate() {
            index.add(i as u64, row).map_err(backend)?;
        }
        Ok(Box::new(UsearchIndex {
            index,
            dim: data.dim(),
            len: data.len(),
        }))
    }
}

/// Approximate nearest neighbour index backed by `usearch`.
pub struct UsearchIndex {
    index: Index,
    dim: usize,
    len: usize,
}

fn backend(e: impl std::fmt::Display) -> SverError {
    SverError::IndexBackend(e.to_string())
}

impl NeighborIndex for UsearchIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.len
    }

    fn knn(&self, queries: &Descriptors, k: usize) -> Result<Neighbors, SverError> {
        if !queries.is_empty() && queries.dim() != self.dim {
            return Err(SverError::DescriptorDimension {
                expected: self.dim,
                got: queries.dim(),
            });
        }
        let mut out = Neighbors::default();
        for q in queries.rows() {
            let results = self.index.search(q, k).map_err(backend)?;
            if results.keys.len() < k.min(self.len) {
                return Err(SverError::NotEnoughNeighbors {
                    required: k,
                    got: results.keys.len(),
                });
            }
            out.indices
                .push(results.keys.iter().map(|&key| key as usize).collect());
            out.dists
                .push(results.distances.iter().map(|&d| d as f64).collect());
        }
        Ok(out)
    }
}
