//! Neighbourhood-graph dimensionality reduction (UMAP).
//!
//! The embedding matrix is standardised column-wise, a k-nearest-neighbour
//! graph is turned into a fuzzy simplicial set, and a low-dimensional layout
//! is optimised against it by stochastic gradient descent with negative
//! sampling. All randomness comes from a [`ChaCha8Rng`] seeded from
//! [`UmapParams::seed`]; identical input and seed give identical output.

use std::collections::BTreeMap;

use ndarray::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{PipelineError, Result};

/// Smallest neighbourhood the reducer will build. Inputs need at least
/// `MIN_NEIGHBORS + 1` rows.
pub const MIN_NEIGHBORS: usize = 2;

const SMOOTH_K_ITERATIONS: usize = 64;
const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const MIN_K_DIST_SCALE: f64 = 1e-3;
const NEGATIVE_SAMPLE_RATE: usize = 5;
const GRADIENT_CLIP: f64 = 4.0;
const INIT_RANGE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UmapParams {
    pub n_components: usize,
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub n_epochs: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl UmapParams {
    /// The seed is mandatory, so there is no `Default`.
    pub fn new(n_components: usize, seed: u64) -> Self {
        Self {
            n_components,
            n_neighbors: 15,
            min_dist: 0.1,
            spread: 1.0,
            n_epochs: 200,
            learning_rate: 1.0,
            seed,
        }
    }

    pub fn with_neighbors(self, n_neighbors: usize) -> Self {
        Self { n_neighbors, ..self }
    }

    pub fn with_min_dist(self, min_dist: f64) -> Self {
        Self { min_dist, ..self }
    }

    pub fn with_epochs(self, n_epochs: usize) -> Self {
        Self { n_epochs, ..self }
    }

    fn validate(&self) -> Result<()> {
        if self.n_components == 0 {
            return Err(PipelineError::InvalidParameter(
                "n_components must be at least 1".into(),
            ));
        }
        if self.n_neighbors < MIN_NEIGHBORS {
            return Err(PipelineError::InvalidParameter(format!(
                "n_neighbors must be at least {}",
                MIN_NEIGHBORS
            )));
        }
        if !(self.min_dist >= 0.0 && self.spread > 0.0 && self.min_dist <= self.spread) {
            return Err(PipelineError::InvalidParameter(format!(
                "need 0 <= min_dist ({}) <= spread ({})",
                self.min_dist, self.spread
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UmapReducer {
    params: UmapParams,
}

impl UmapReducer {
    pub fn new(params: UmapParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &UmapParams {
        &self.params
    }

    /// Project `matrix` (rows = posts) to `n_components` dimensions. Row
    /// order is preserved.
    pub fn reduce(&self, matrix: &Array2<f64>) -> Result<Array2<f64>> {
        self.params.validate()?;
        let n = matrix.nrows();
        let min_points = MIN_NEIGHBORS + 1;
        if n < min_points {
            return Err(PipelineError::DegenerateInput {
                points: n,
                min_points,
            });
        }

        let n_neighbors = if self.params.n_neighbors >= n {
            warn!(
                requested = self.params.n_neighbors,
                used = n - 1,
                "n_neighbors exceeds point count; clamping"
            );
            n - 1
        } else {
            self.params.n_neighbors
        };

        let scaled = standardize(matrix);
        let knn = nearest_neighbors(&scaled, n_neighbors);
        let graph = fuzzy_simplicial_set(&knn, n_neighbors);
        let (a, b) = fit_ab(self.params.spread, self.params.min_dist);
        debug!(points = n, n_neighbors, edges = graph.len(), a, b, "built neighbour graph");

        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let mut embedding = Array2::from_shape_simple_fn((n, self.params.n_components), || {
            rng.gen_range(-INIT_RANGE..INIT_RANGE)
        });
        self.optimize_layout(&mut embedding, &graph, a, b, &mut rng);
        Ok(embedding)
    }

    fn optimize_layout(
        &self,
        embedding: &mut Array2<f64>,
        graph: &[(usize, usize, f64)],
        a: f64,
        b: f64,
        rng: &mut ChaCha8Rng,
    ) {
        let n = embedding.nrows();
        let n_epochs = self.params.n_epochs;
        let Some(max_weight) = graph.iter().map(|e| e.2).reduce(f64::max) else {
            return;
        };

        // Edges are sampled in proportion to their membership strength.
        let epochs_per_sample: Vec<f64> = graph
            .iter()
            .map(|&(_, _, w)| {
                let samples = n_epochs as f64 * w / max_weight;
                if samples > 0.0 { n_epochs as f64 / samples } else { f64::INFINITY }
            })
            .collect();
        let mut next_sample = epochs_per_sample.clone();

        for epoch in 0..n_epochs {
            let alpha = self.params.learning_rate * (1.0 - epoch as f64 / n_epochs as f64);
            for (edge, &(head, tail, _)) in graph.iter().enumerate() {
                if next_sample[edge] > epoch as f64 {
                    continue;
                }

                let diff = &embedding.row(head) - &embedding.row(tail);
                let dist2 = diff.dot(&diff);
                let coeff = if dist2 > 0.0 {
                    -2.0 * a * b * dist2.powf(b - 1.0) / (a * dist2.powf(b) + 1.0)
                } else {
                    0.0
                };
                for (d, delta) in diff.iter().enumerate() {
                    let g = clip(coeff * delta) * alpha;
                    embedding[[head, d]] += g;
                    embedding[[tail, d]] -= g;
                }
                next_sample[edge] += epochs_per_sample[edge];

                for _ in 0..NEGATIVE_SAMPLE_RATE {
                    let other = rng.gen_range(0..n);
                    if other == head {
                        continue;
                    }
                    let diff = &embedding.row(head) - &embedding.row(other);
                    let dist2 = diff.dot(&diff);
                    let coeff = if dist2 > 0.0 {
                        2.0 * b / ((0.001 + dist2) * (a * dist2.powf(b) + 1.0))
                    } else {
                        0.0
                    };
                    for (d, delta) in diff.iter().enumerate() {
                        let g = if coeff > 0.0 { clip(coeff * delta) } else { GRADIENT_CLIP };
                        embedding[[head, d]] += g * alpha;
                    }
                }
            }
        }
    }
}

fn clip(value: f64) -> f64 {
    value.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

/// Zero-mean, unit-variance columns. Constant columns become all zeros.
pub fn standardize(matrix: &Array2<f64>) -> Array2<f64> {
    let Some(mean) = matrix.mean_axis(Axis(0)) else {
        return matrix.to_owned();
    };
    let std = matrix.std_axis(Axis(0), 0.0).mapv(|s| if s > 0.0 { s } else { 1.0 });
    (matrix - &mean) / &std
}

/// For every row, its `k` nearest other rows as `(index, distance)`,
/// closest first. Ties resolve to the lower index.
fn nearest_neighbors(matrix: &Array2<f64>, k: usize) -> Vec<Vec<(usize, f64)>> {
    let n = matrix.nrows();
    (0..n)
        .map(|i| {
            let row = matrix.row(i);
            let mut distances: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    let diff = &row - &matrix.row(j);
                    (j, diff.dot(&diff).sqrt())
                })
                .collect();
            distances.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));
            distances.truncate(k);
            distances
        })
        .collect()
}

/// Per-point `(rho, sigma)`: distance to the nearest neighbour and the
/// bandwidth for which the neighbour memberships sum to `log2(k)`.
fn smooth_knn_distances(distances: &[f64], k: usize, mean_distance: f64) -> (f64, f64) {
    let target = (k as f64).log2();
    let rho = distances.iter().copied().find(|d| *d > 0.0).unwrap_or(0.0);

    let (mut lo, mut hi, mut mid) = (0.0, f64::INFINITY, 1.0);
    for _ in 0..SMOOTH_K_ITERATIONS {
        let psum: f64 = distances
            .iter()
            .map(|d| {
                let d = d - rho;
                if d > 0.0 { (-d / mid).exp() } else { 1.0 }
            })
            .sum();
        if (psum - target).abs() < SMOOTH_K_TOLERANCE {
            break;
        }
        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }

    let floor = if rho > 0.0 {
        let local_mean = distances.iter().sum::<f64>() / distances.len() as f64;
        MIN_K_DIST_SCALE * local_mean
    } else {
        MIN_K_DIST_SCALE * mean_distance
    };
    (rho, mid.max(floor))
}

/// Symmetrised membership graph as `(i, j, weight)` with `i < j`, in a
/// deterministic order.
fn fuzzy_simplicial_set(knn: &[Vec<(usize, f64)>], k: usize) -> Vec<(usize, usize, f64)> {
    let all: Vec<f64> = knn.iter().flatten().map(|(_, d)| *d).collect();
    let mean_distance = if all.is_empty() {
        0.0
    } else {
        all.iter().sum::<f64>() / all.len() as f64
    };

    let mut directed: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (i, neighbors) in knn.iter().enumerate() {
        let distances: Vec<f64> = neighbors.iter().map(|(_, d)| *d).collect();
        let (rho, sigma) = smooth_knn_distances(&distances, k, mean_distance);
        for &(j, d) in neighbors {
            let w = if d - rho <= 0.0 { 1.0 } else { (-(d - rho) / sigma).exp() };
            directed.insert((i, j), w);
        }
    }

    // Fuzzy union: w_ij + w_ji - w_ij * w_ji.
    let mut undirected: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (&(i, j), &w) in &directed {
        let key = (i.min(j), i.max(j));
        if undirected.contains_key(&key) {
            continue;
        }
        let back = directed.get(&(j, i)).copied().unwrap_or(0.0);
        undirected.insert(key, w + back - w * back);
    }
    undirected
        .into_iter()
        .filter(|(_, w)| *w > 0.0)
        .map(|((i, j), w)| (i, j, w))
        .collect()
}

/// Fit `1 / (1 + a * x^(2b))` to the target low-dimensional membership
/// curve for the given `spread` and `min_dist`, by grid search.
fn fit_ab(spread: f64, min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (1..=300).map(|i| i as f64 * 3.0 * spread / 300.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() })
        .collect();
    let error = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let f = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (f - y) * (f - y)
            })
            .sum()
    };

    let mut best = (1.0, 1.0, f64::INFINITY);
    for bi in 0..=150 {
        let b = 0.5 + bi as f64 * 0.01;
        for ai in 0..=200 {
            let a = 10f64.powf(-1.0 + ai as f64 * 0.01);
            let e = error(a, b);
            if e < best.2 {
                best = (a, b, e);
            }
        }
    }
    (best.0, best.1)
}
