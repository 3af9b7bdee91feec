use super::{Descriptors, IndexBuilder, NeighborIndex, Neighbors};
use crate::error::SverError;

/// Builds a [`BruteForceIndex`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BruteForceBuilder;

impl IndexBuilder for BruteForceBuilder {
    fn name(&self) -> &'static str {
        "brute_force"
    }

    fn build(&self, data: &Descriptors) -> Result<Box<dyn NeighborIndex>, SverError> {
        Ok(Box::new(BruteForceIndex::new(data.clone())))
    }
}

/// Exact search: every query is compared with every indexed row.
///
/// Equal distances are ordered by index, so results are deterministic.
#[derive(Debug, Clone)]
pub struct BruteForceIndex {
    data: Descriptors,
}

impl BruteForceIndex {
    pub fn new(data: Descriptors) -> Self {
        Self { data }
    }

    fn query(&self, q: &[f32], k: usize) -> (Vec<usize>, Vec<f64>) {
        let mut scored: Vec<(f64, usize)> = self
            .data
            .rows()
            .enumerate()
            .map(|(i, row)| (l2_sqrd(q, row), i))
            .collect();
        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k, |a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            scored.truncate(k);
        }
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.into_iter().map(|(d, i)| (i, d)).unzip()
    }
}

fn l2_sqrd(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum()
}

impl NeighborIndex for BruteForceIndex {
    fn dim(&self) -> usize {
        self.data.dim()
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn knn(&self, queries: &Descriptors, k: usize) -> Result<Neighbors, SverError> {
        if !queries.is_empty() && queries.dim() != self.dim() {
            return Err(SverError::DescriptorDimension {
                expected: self.dim(),
                got: queries.dim(),
            });
        }

        #[cfg(feature = "parallel")]
        let rows: Vec<(Vec<usize>, Vec<f64>)> = {
            use rayon::prelude::*;
            (0..queries.len())
                .into_par_iter()
                .map(|q| self.query(queries.row(q), k))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let rows: Vec<(Vec<usize>, Vec<f64>)> =
            queries.rows().map(|q| self.query(q, k)).collect();

        let (indices, dists) = rows.into_iter().unzip();
        Ok(Neighbors { indices, dists })
    }
}
