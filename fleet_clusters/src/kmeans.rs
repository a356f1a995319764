//! Seeded k-means over standardized features.

use crate::stats::{mean, population_std};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seed for every k-means run. Cluster membership depends on it, so it is
/// fixed rather than configurable.
pub const KMEANS_SEED: u64 = 6;

#[derive(Debug, Clone)]
pub struct KMeansConfig {
    pub n_clusters: usize,
    pub n_init: usize,
    pub max_iter: usize,
    /// Convergence tolerance relative to the mean feature variance
    pub tol: f64,
    pub seed: u64,
}

impl KMeansConfig {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
            seed: KMEANS_SEED,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    /// 0-based cluster label per input row
    pub labels: Vec<usize>,
    pub centers: Vec<Vec<f64>>,
    pub inertia: f64,
}

/// Z-score each column with the population standard deviation. Constant
/// columns are centered but not scaled.
pub fn standardize(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let Some(first) = rows.first() else {
        return vec![];
    };
    let n_features = first.len();
    let mut scaled = rows.to_vec();
    for j in 0..n_features {
        let column: Vec<f64> = rows.iter().map(|r| r[j]).collect();
        let m = mean(&column).unwrap_or(0.0);
        let sd = match population_std(&column) {
            Some(sd) if sd > 0.0 => sd,
            _ => 1.0,
        };
        for row in scaled.iter_mut() {
            row[j] = (row[j] - m) / sd;
        }
    }
    scaled
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

pub struct KMeans {
    config: KMeansConfig,
}

impl KMeans {
    pub fn new(config: KMeansConfig) -> Self {
        Self { config }
    }

    /// Fit `n_clusters` clusters; callers guarantee `n_clusters <= rows.len()`.
    /// Every cluster in the result has at least one member.
    pub fn fit(&self, rows: &[Vec<f64>]) -> KMeansFit {
        let k = self.config.n_clusters.min(rows.len());
        if k == 0 {
            return KMeansFit {
                labels: vec![],
                centers: vec![],
                inertia: 0.0,
            };
        }

        let tol = self.config.tol * mean_variance(rows);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut best: Option<KMeansFit> = None;

        for _ in 0..self.config.n_init.max(1) {
            let centers = kmeans_plus_plus(rows, k, &mut rng);
            let fit = lloyd(rows, centers, self.config.max_iter, tol);
            if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
                best = Some(fit);
            }
        }

        best.unwrap_or_else(|| KMeansFit {
            labels: vec![0; rows.len()],
            centers: vec![],
            inertia: 0.0,
        })
    }
}

fn mean_variance(rows: &[Vec<f64>]) -> f64 {
    let n_features = rows.first().map_or(0, Vec::len);
    if n_features == 0 {
        return 0.0;
    }
    let total: f64 = (0..n_features)
        .map(|j| {
            let column: Vec<f64> = rows.iter().map(|r| r[j]).collect();
            population_std(&column).map_or(0.0, |sd| sd * sd)
        })
        .sum();
    total / n_features as f64
}

/// Pick initial centers with probability proportional to squared distance
fn kmeans_plus_plus(rows: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centers = Vec::with_capacity(k);
    centers.push(rows[rng.gen_range(0..rows.len())].clone());

    let mut closest: Vec<f64> = rows.iter().map(|r| squared_distance(r, &centers[0])).collect();
    while centers.len() < k {
        let total: f64 = closest.iter().sum();
        let index = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = rows.len() - 1;
            for (i, d) in closest.iter().enumerate() {
                cumulative += d;
                if cumulative > target {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            rng.gen_range(0..rows.len())
        };

        let center = rows[index].clone();
        for (d, row) in closest.iter_mut().zip(rows) {
            *d = d.min(squared_distance(row, &center));
        }
        centers.push(center);
    }
    centers
}

fn assign(rows: &[Vec<f64>], centers: &[Vec<f64>]) -> Vec<usize> {
    rows.iter()
        .map(|row| {
            let mut best = 0;
            let mut best_distance = f64::INFINITY;
            for (c, center) in centers.iter().enumerate() {
                let d = squared_distance(row, center);
                if d < best_distance {
                    best = c;
                    best_distance = d;
                }
            }
            best
        })
        .collect()
}

/// Move the farthest point of a multi-member cluster into each empty cluster
fn relocate_empty(rows: &[Vec<f64>], centers: &[Vec<f64>], labels: &mut [usize]) {
    let k = centers.len();
    let mut counts = vec![0usize; k];
    for &label in labels.iter() {
        counts[label] += 1;
    }
    for empty in 0..k {
        if counts[empty] > 0 {
            continue;
        }
        let candidate = labels
            .iter()
            .enumerate()
            .filter(|(_, &label)| counts[label] > 1)
            .map(|(i, &label)| (i, squared_distance(&rows[i], &centers[label])))
            .fold(None, |acc: Option<(usize, f64)>, (i, d)| match acc {
                Some((_, best)) if best >= d => acc,
                _ => Some((i, d)),
            });
        if let Some((i, _)) = candidate {
            counts[labels[i]] -= 1;
            labels[i] = empty;
            counts[empty] += 1;
        }
    }
}

fn update_centers(rows: &[Vec<f64>], labels: &[usize], k: usize) -> Vec<Vec<f64>> {
    let n_features = rows[0].len();
    let mut sums = vec![vec![0.0; n_features]; k];
    let mut counts = vec![0usize; k];
    for (row, &label) in rows.iter().zip(labels) {
        counts[label] += 1;
        for (s, v) in sums[label].iter_mut().zip(row) {
            *s += v;
        }
    }
    for (sum, count) in sums.iter_mut().zip(&counts) {
        if *count > 0 {
            for s in sum.iter_mut() {
                *s /= *count as f64;
            }
        }
    }
    sums
}

fn lloyd(rows: &[Vec<f64>], mut centers: Vec<Vec<f64>>, max_iter: usize, tol: f64) -> KMeansFit {
    let k = centers.len();
    let mut labels = vec![0; rows.len()];

    for _ in 0..max_iter.max(1) {
        labels = assign(rows, &centers);
        relocate_empty(rows, &centers, &mut labels);
        let new_centers = update_centers(rows, &labels, k);
        let shift: f64 = centers
            .iter()
            .zip(&new_centers)
            .map(|(a, b)| squared_distance(a, b))
            .sum();
        centers = new_centers;
        if shift <= tol {
            break;
        }
    }

    let inertia = rows
        .iter()
        .zip(&labels)
        .map(|(row, &label)| squared_distance(row, &centers[label]))
        .sum();
    KMeansFit {
        labels,
        centers,
        inertia,
    }
}
