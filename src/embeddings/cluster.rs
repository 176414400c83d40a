//! Seeded k-means over embedding vectors.
//!
//! The learning loop groups agent-description embeddings into a handful of
//! clusters and logs the group sizes. Determinism matters more than
//! quality here: the same inputs and seed must always produce the same
//! labeling.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Default random seed, fixed so repeated runs are comparable.
pub const DEFAULT_SEED: u64 = 42;

/// Maximum assign/update rounds before giving up on convergence.
const MAX_ITERATIONS: usize = 25;

/// Cluster `vectors` into at most `k` groups, returning one group id per
/// input vector.
///
/// `k` is clamped to the number of vectors to avoid degenerate clustering.
/// Degenerate inputs (no vectors, a single cluster, zero-dimensional
/// vectors) yield the all-zeros labeling rather than an error.
pub fn cluster(vectors: &[Vec<f32>], k: usize, seed: u64) -> Vec<usize> {
    if vectors.is_empty() {
        return Vec::new();
    }

    let k = k.min(vectors.len());
    let dim = vectors[0].len();
    if k <= 1 || dim == 0 {
        return vec![0; vectors.len()];
    }

    // Seeded initialisation: pick k distinct vectors as starting centroids.
    let mut rng = StdRng::seed_from_u64(seed);
    let init = rand::seq::index::sample(&mut rng, vectors.len(), k);
    let mut centroids: Vec<Vec<f32>> = init.iter().map(|i| vectors[i].clone()).collect();

    let mut labels = vec![0usize; vectors.len()];

    for _ in 0..MAX_ITERATIONS {
        // Assignment step
        let mut changed = false;
        for (i, v) in vectors.iter().enumerate() {
            let nearest = nearest_centroid(v, &centroids);
            if labels[i] != nearest {
                labels[i] = nearest;
                changed = true;
            }
        }

        // Update step: empty clusters keep their previous centroid.
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (v, &label) in vectors.iter().zip(labels.iter()) {
            counts[label] += 1;
            for (s, x) in sums[label].iter_mut().zip(v.iter()) {
                *s += x;
            }
        }
        for (c, (sum, &count)) in centroids.iter_mut().zip(sums.iter().zip(counts.iter())) {
            if count > 0 {
                for (ci, si) in c.iter_mut().zip(sum.iter()) {
                    *ci = si / count as f32;
                }
            }
        }

        if !changed {
            break;
        }
    }

    labels
}

/// Count how many vectors landed in each of the `k` groups.
pub fn group_sizes(labels: &[usize], k: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; k];
    for &label in labels {
        if label < k {
            sizes[label] += 1;
        }
    }
    sizes
}

fn nearest_centroid(v: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let dist = squared_distance(v, c);
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
