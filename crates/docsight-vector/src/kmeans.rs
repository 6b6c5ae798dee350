//! Spherical k-means for training inverted-list centroids
//!
//! Vectors are assumed L2 normalized; assignment maximizes inner product and
//! centroids are re-normalized after every update. Seeding is deterministic
//! (evenly strided samples) so training the same data twice yields the same
//! centroids.

use docsight_core::{DocsightError, Result};

/// Relative improvement below which training stops early
const CONVERGENCE_THRESHOLD: f32 = 1e-4;

/// Inner product of two equal-length vectors
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Normalize in place; zero vectors are left untouched
pub fn l2_normalize(v: &mut [f32]) {
    let norm = dot(v, v).sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Index of the centroid with the highest inner product against `point`
pub fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let score = dot(point, centroid);
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    best
}

/// Train `k` centroids over row-major `data` of the given dimension
pub fn train(
    data: &[f32],
    dimension: usize,
    k: usize,
    max_iterations: usize,
) -> Result<Vec<Vec<f32>>> {
    if dimension == 0 || data.is_empty() || data.len() % dimension != 0 {
        return Err(DocsightError::Validation(
            "Cannot run k-means on empty or ragged data".to_string(),
        ));
    }

    let n = data.len() / dimension;
    if k == 0 || k > n {
        return Err(DocsightError::Validation(format!(
            "Cannot train {k} clusters over {n} vectors"
        )));
    }

    let row = |i: usize| &data[i * dimension..(i + 1) * dimension];

    // Strided seeding spreads initial centroids across insertion order
    let stride = n / k;
    let mut centroids: Vec<Vec<f32>> = (0..k).map(|c| row(c * stride).to_vec()).collect();

    let mut prev_objective = f32::NEG_INFINITY;
    for iteration in 0..max_iterations.max(1) {
        let assignments: Vec<usize> = (0..n)
            .map(|i| nearest_centroid(row(i), &centroids))
            .collect();

        let mut sums = vec![vec![0.0f32; dimension]; k];
        let mut counts = vec![0usize; k];
        for (i, &cluster) in assignments.iter().enumerate() {
            for (acc, &val) in sums[cluster].iter_mut().zip(row(i)) {
                *acc += val;
            }
            counts[cluster] += 1;
        }

        for (c, (sum, &count)) in sums.iter_mut().zip(&counts).enumerate() {
            if count == 0 {
                // Empty cluster: reseed from a fixed point
                sum.copy_from_slice(row((c * stride + iteration) % n));
            }
            l2_normalize(sum);
        }
        centroids = sums;

        let objective: f32 = assignments
            .iter()
            .enumerate()
            .map(|(i, &cluster)| dot(row(i), &centroids[cluster]))
            .sum();

        if (objective - prev_objective).abs() <= CONVERGENCE_THRESHOLD * objective.abs() {
            tracing::debug!(iteration, objective, "kmeans_converged");
            break;
        }
        prev_objective = objective;
    }

    Ok(centroids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Vec<f32> {
        let mut data = Vec::new();
        for i in 0..10 {
            let jitter = i as f32 * 0.01;
            let mut a = vec![1.0, jitter, 0.0];
            let mut b = vec![0.0, jitter, 1.0];
            l2_normalize(&mut a);
            l2_normalize(&mut b);
            data.extend(a);
            data.extend(b);
        }
        data
    }

    #[test]
    fn test_separates_two_blobs() {
        let data = two_blobs();
        let centroids = train(&data, 3, 2, 20).unwrap();
        assert_eq!(centroids.len(), 2);

        let x = nearest_centroid(&[1.0, 0.0, 0.0], &centroids);
        let z = nearest_centroid(&[0.0, 0.0, 1.0], &centroids);
        assert_ne!(x, z);
    }

    #[test]
    fn test_centroids_are_normalized() {
        let centroids = train(&two_blobs(), 3, 2, 20).unwrap();
        for c in &centroids {
            assert!((dot(c, c).sqrt() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_deterministic() {
        let data = two_blobs();
        assert_eq!(train(&data, 3, 4, 10).unwrap(), train(&data, 3, 4, 10).unwrap());
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(train(&[], 3, 1, 10).is_err());
        assert!(train(&[1.0, 0.0], 3, 1, 10).is_err());
        assert!(train(&[1.0, 0.0, 0.0], 3, 2, 10).is_err());
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
