use std::collections::BTreeMap;

use rand::distributions::{Distribution, Uniform, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Variance floor applied at every step of the fit.
pub const EPSILON_VARIANCE: f64 = 1.0 / 16.0;

const DEFAULT_SEED: u64 = 0x5EED;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Component {
    pub mean: f64,
    pub variance: f64,
    pub weight: f64,
}

pub struct Fit {
    pub components: Vec<Component>,
    pub bic: f64,
}

#[derive(Clone, Copy)]
struct Bin {
    value: f64,
    count: f64,
}

/// One-dimensional Gaussian mixture estimation over a value histogram:
/// k-means++ seeding, count-weighted Lloyd iterations, then
/// expectation-maximization; model selection by BIC.
pub struct GaussianMixture {
    kmeans_tol: f64,
    kmeans_iter: usize,
    em_tol: f64,
    em_iter: usize,
    deterministic: bool,
    bins: Vec<Bin>,
    nb_data: f64,
}

impl GaussianMixture {
    pub fn new(
        kmeans_tol: f64,
        kmeans_iter: usize,
        em_tol: f64,
        em_iter: usize,
        deterministic: bool,
    ) -> GaussianMixture {
        GaussianMixture {
            kmeans_tol,
            kmeans_iter,
            em_tol,
            em_iter,
            deterministic,
            bins: vec![],
            nb_data: 0.0,
        }
    }

    pub fn set_samples(&mut self, data: &[i32]) {
        let mut counts: BTreeMap<i32, u64> = BTreeMap::new();
        for &value in data {
            *counts.entry(value).or_default() += 1;
        }
        self.set_histogram(counts);
    }

    pub fn set_histogram(&mut self, counts: impl IntoIterator<Item = (i32, u64)>) {
        self.bins = counts
            .into_iter()
            .filter(|&(_, count)| count > 0)
            .map(|(value, count)| Bin {
                value: f64::from(value),
                count: count as f64,
            })
            .collect();
        self.nb_data = self.bins.iter().map(|b| b.count).sum();
    }

    /// Fit a `k`-component mixture. `None` when the histogram has fewer
    /// distinct values than components.
    pub fn fit(&self, k: usize) -> Option<Fit> {
        if k == 0 || self.bins.len() < k {
            return None;
        }
        let mut rng = if self.deterministic {
            StdRng::seed_from_u64(DEFAULT_SEED)
        } else {
            StdRng::from_entropy()
        };

        let (means, assignment) = self.kmeans_plus_plus(k, &mut rng);
        let components = self.initial_components(&means, &assignment);
        let components = self.expectation_maximization(components);
        let bic = -2.0 * self.log_likelihood(&components)
            + (3 * k - 1) as f64 * self.nb_data.ln();
        Some(Fit { components, bic })
    }

    /// Fit K = 1..=`max_k` and keep the BIC minimizer.
    pub fn fit_best(&self, max_k: usize) -> Option<Vec<Component>> {
        (1..=max_k)
            .filter_map(|k| self.fit(k))
            .min_by(|a, b| a.bic.total_cmp(&b.bic))
            .map(|fit| fit.components)
    }

    fn kmeans_plus_plus(&self, k: usize, rng: &mut StdRng) -> (Vec<f64>, Vec<usize>) {
        let bins = &self.bins;
        let mut means = vec![0f64; k];
        means[0] = bins[Uniform::from(0..bins.len()).sample(rng)].value;

        // Seed the remaining means proportionally to the squared distance to
        // the nearest mean chosen so far.
        let mut nearest_sq = vec![f64::MAX; bins.len()];
        for c in 1..k {
            for (b, bin) in bins.iter().enumerate() {
                let d = means[c - 1] - bin.value;
                nearest_sq[b] = nearest_sq[b].min(d * d);
            }
            means[c] = match WeightedIndex::new(nearest_sq.iter().copied()) {
                Ok(weighted) => bins[weighted.sample(rng)].value,
                // All remaining mass sits on already-chosen values.
                Err(_) => bins[c].value,
            };
        }

        // Lloyd iterations, bins weighted by their counts. Ties go to the
        // lowest-index cluster.
        let mut assignment = vec![0usize; bins.len()];
        let mut sums = vec![0f64; k];
        let mut counts = vec![0f64; k];
        let mut max_shift = f64::MAX;
        let mut iteration = 0;
        while max_shift > self.kmeans_tol && iteration < self.kmeans_iter {
            sums.iter_mut().for_each(|s| *s = 0.0);
            counts.iter_mut().for_each(|c| *c = 0.0);
            for (b, bin) in bins.iter().enumerate() {
                let mut best = f64::MAX;
                for (c, mean) in means.iter().enumerate() {
                    let d = (mean - bin.value).abs();
                    if d < best {
                        best = d;
                        assignment[b] = c;
                    }
                }
                sums[assignment[b]] += bin.value * bin.count;
                counts[assignment[b]] += bin.count;
            }
            max_shift = 0.0;
            for c in 0..k {
                if counts[c] > 0.0 {
                    let centroid = sums[c] / counts[c];
                    max_shift = max_shift.max((means[c] - centroid).abs());
                    means[c] = centroid;
                }
            }
            iteration += 1;
        }

        (means, assignment)
    }

    fn initial_components(&self, means: &[f64], assignment: &[usize]) -> Vec<Component> {
        let k = means.len();
        let mut variances = vec![0f64; k];
        let mut counts = vec![0f64; k];
        for (b, bin) in self.bins.iter().enumerate() {
            let c = assignment[b];
            let d = bin.value - means[c];
            variances[c] += d * d * bin.count;
            counts[c] += bin.count;
        }
        means
            .iter()
            .zip(variances)
            .zip(counts)
            .map(|((&mean, variance), count)| {
                let variance = if count > 0.0 { variance / count } else { 0.0 };
                Component {
                    mean,
                    variance: variance.max(EPSILON_VARIANCE),
                    weight: 1.0 / k as f64,
                }
            })
            .collect()
    }

    fn expectation_maximization(&self, mut components: Vec<Component>) -> Vec<Component> {
        let bins = &self.bins;
        let k = components.len();
        let mut resp = vec![vec![0f64; bins.len()]; k];
        let mut log_lh = self.log_likelihood(&components);
        let mut gain = f64::MAX;
        let mut iteration = 0;

        while gain > self.em_tol && iteration < self.em_iter {
            // Expectation: per-bin responsibilities, with a uniform fallback
            // when every component underflows.
            let mut acc = vec![0f64; bins.len()];
            for (c, component) in components.iter().enumerate() {
                for (b, bin) in bins.iter().enumerate() {
                    let p = normal_pdf(bin.value, component);
                    if p > f64::EPSILON {
                        acc[b] += p;
                        resp[c][b] = p;
                    } else {
                        resp[c][b] = 0.0;
                    }
                }
            }
            for row in resp.iter_mut() {
                for (b, r) in row.iter_mut().enumerate() {
                    if acc[b] > f64::EPSILON {
                        *r /= acc[b];
                    } else {
                        *r = 1.0 / k as f64;
                    }
                }
            }

            // Maximization.
            for (c, component) in components.iter_mut().enumerate() {
                let mut cluster_resp = 0.0;
                let mut mean = 0.0;
                for (b, bin) in bins.iter().enumerate() {
                    cluster_resp += resp[c][b] * bin.count;
                    mean += resp[c][b] * bin.value * bin.count;
                }
                if cluster_resp <= f64::EPSILON {
                    continue;
                }
                mean /= cluster_resp;

                let mut variance = 0.0;
                for (b, bin) in bins.iter().enumerate() {
                    let d = bin.value - mean;
                    variance += resp[c][b] * d * d * bin.count;
                }
                component.mean = mean;
                component.variance = (variance / cluster_resp).max(EPSILON_VARIANCE);
                component.weight = cluster_resp / self.nb_data;
            }

            let new_log_lh = self.log_likelihood(&components);
            gain = new_log_lh - log_lh;
            log_lh = new_log_lh;
            iteration += 1;
        }

        components
    }

    fn log_likelihood(&self, components: &[Component]) -> f64 {
        self.bins
            .iter()
            .map(|bin| {
                let p: f64 = components.iter().map(|c| normal_pdf(bin.value, c)).sum();
                p.ln() * bin.count
            })
            .sum()
    }
}

fn normal_pdf(x: f64, component: &Component) -> f64 {
    let d = x - component.mean;
    (-d * d / (2.0 * component.variance)).exp()
        / (2.0 * std::f64::consts::PI * component.variance).sqrt()
        * component.weight
}
