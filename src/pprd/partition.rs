use linfa::prelude::*;
use linfa_clustering::KMeans;
use ndarray::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    error::{PipelineError, Result},
    model::{ClusterCount, ClusterLabel},
    renumber::renumber,
};

/// Hyperparameters for [`KMeansPartitioner`]. The seed is required; there
/// is no ambient randomness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartitionParams {
    pub k: ClusterCount,
    pub seed: u64,
    pub max_iterations: u64,
    pub tolerance: f64,
    /// Independent k-means++ restarts; the lowest-inertia run wins.
    pub n_runs: usize,
}

impl PartitionParams {
    pub fn new(k: ClusterCount, seed: u64) -> Self {
        Self {
            k,
            seed,
            max_iterations: 300,
            tolerance: 1e-4,
            n_runs: 10,
        }
    }
}

/// Centroid-based partitioning of the (reduced) embedding matrix.
///
/// Ties: a point equidistant to two centroids goes to the lower-indexed
/// centroid. Which centroid ends up lower-indexed depends on the k-means++
/// draw, so for a fixed seed the outcome is reproducible, but it may move
/// between seeds.
#[derive(Debug, Clone)]
pub struct KMeansPartitioner {
    params: PartitionParams,
}

impl KMeansPartitioner {
    pub fn new(params: PartitionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PartitionParams {
        &self.params
    }

    /// Label every row of `matrix` with one of `k` contiguous groups.
    /// Fails with [`PipelineError::InsufficientData`] if there are fewer
    /// rows than groups.
    pub fn partition(&self, matrix: &Array2<f64>) -> Result<Vec<ClusterLabel>> {
        let k = self.params.k.get();
        let n = matrix.nrows();
        if n < k {
            return Err(PipelineError::InsufficientData { posts: n, k });
        }
        if k == 1 {
            return Ok(vec![ClusterLabel::default(); n]);
        }

        let rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let dataset = DatasetBase::from(matrix.to_owned());
        let model = KMeans::params_with_rng(k, rng)
            .n_runs(self.params.n_runs)
            .max_n_iterations(self.params.max_iterations)
            .tolerance(self.params.tolerance)
            .fit(&dataset)?;

        let raw: Array1<usize> = model.predict(matrix);
        debug!(
            rows = n,
            k,
            inertia = model.inertia(),
            "k-means converged"
        );
        renumber(&raw.to_vec(), k)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    /// Three tight blobs, interleaved so that dataset order differs from
    /// blob order.
    fn blobs() -> Array2<f64> {
        array![
            [10.0, 10.0, 0.0],
            [0.0, 0.0, 0.0],
            [-10.0, 10.0, 5.0],
            [10.2, 9.9, 0.1],
            [0.1, 0.2, 0.0],
            [-9.8, 10.1, 5.2],
            [9.9, 10.3, -0.1],
            [0.2, -0.1, 0.1],
            [-10.1, 9.7, 4.9],
            [10.1, 10.0, 0.0],
        ]
    }

    fn partitioner(k: usize, seed: u64) -> KMeansPartitioner {
        KMeansPartitioner::new(PartitionParams::new(ClusterCount::try_new(k).unwrap(), seed))
    }

    #[test]
    fn test_ten_posts_three_groups() {
        let labels = partitioner(3, 42).partition(&blobs()).unwrap();
        assert_eq!(labels.len(), 10);

        let used: BTreeSet<_> = labels.iter().map(|l| l.index()).collect();
        assert_eq!(used, BTreeSet::from([0, 1, 2]));

        // Renumbered in order of first appearance.
        assert_eq!(labels[0].index(), 0);
        assert_eq!(labels[1].index(), 1);
        assert_eq!(labels[2].index(), 2);
        assert_eq!(labels[3], labels[0]);
        assert_eq!(labels[4], labels[1]);
        assert_eq!(labels[8], labels[2]);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let data = blobs();
        let a = partitioner(4, 7).partition(&data).unwrap();
        let b = partitioner(4, 7).partition(&data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_labels_contiguous_for_every_k() {
        let data = blobs();
        for k in 2..=data.nrows() {
            let labels = partitioner(k, 42).partition(&data).unwrap();
            assert_eq!(labels.len(), data.nrows());
            let used: BTreeSet<_> = labels.iter().map(|l| l.index()).collect();
            let max = *used.iter().max().unwrap();
            assert!(max < k, "label {} out of range for k={}", max, k);
            // Used labels form a prefix of 0..k; anything after is a reserved empty slot.
            assert_eq!(used, (0..=max).collect::<BTreeSet<_>>());
        }
    }

    #[test]
    fn test_insufficient_data() {
        let data = array![[0.0, 1.0], [1.0, 0.0], [2.0, 2.0]];
        let result = partitioner(5, 42).partition(&data);
        assert!(matches!(
            result,
            Err(PipelineError::InsufficientData { posts: 3, k: 5 })
        ));
    }

    #[test]
    fn test_single_group() {
        let data = array![[0.5, 0.5]];
        let labels = partitioner(1, 42).partition(&data).unwrap();
        assert_eq!(labels, vec![ClusterLabel::from(0)]);
    }
}
