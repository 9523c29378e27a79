use anyhow::{bail, Result};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Distribution, Gamma, Uniform};

use crate::genotype::GenotypeTensor;

/// Parameters for simulating admixed samples from drifting populations.
#[derive(Debug, Clone)]
pub struct AdmixtureSimParams {
    /// Number of source populations
    pub num_pops: usize,
    /// Number of independent loci
    pub num_loci: usize,
    /// Individuals sampled at each time step
    pub individuals_per_step: Vec<usize>,
    /// Generation of each time step, strictly increasing
    pub generations: Vec<usize>,
    /// Effective population size (diploid) of every source population
    pub pop_size: usize,
    /// Symmetric Dirichlet concentration of admixture proportions
    pub dirichlet_alpha: f64,
    /// Fraction of individuals carrying a single copy
    pub hemizygous_fraction: f64,
    /// Minimum initial derived allele frequency
    pub freq_min: f64,
    /// Maximum initial derived allele frequency
    pub freq_max: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for AdmixtureSimParams {
    fn default() -> Self {
        AdmixtureSimParams {
            num_pops: 2,
            num_loci: 100,
            individuals_per_step: vec![20; 4],
            generations: vec![0, 20, 40, 60],
            pop_size: 1000,
            dirichlet_alpha: 0.5,
            hemizygous_fraction: 0.0,
            freq_min: 0.05,
            freq_max: 0.95,
            seed: 42,
        }
    }
}

/// Simulated genotypes with the truth that generated them.
pub struct SimulatedAdmixture {
    pub data: GenotypeTensor,
    /// `T x K x L` population allele frequencies at the sampling times
    pub freqs: Array3<f64>,
    /// `N x K` admixture proportions in `(t, d)` order
    pub proportions: Array2<f64>,
}

/// Simulate admixed genotypes at several sampling times.
///
/// 1. Draw initial frequencies per (population, locus) from
///    `Uniform(freq_min, freq_max)`.
/// 2. Drift each population forward by Wright-Fisher binomial sampling of
///    `2 * pop_size` allele copies per generation, recording the
///    frequencies at every sampling generation.
/// 3. For each sampled individual draw proportions from a symmetric
///    Dirichlet, then a dosage from `Binomial(2, p)` (or `2 * Bernoulli(p)`
///    when hemizygous) with `p` the proportion-weighted frequency.
pub fn simulate_admixture(params: &AdmixtureSimParams) -> Result<SimulatedAdmixture> {
    let nt = params.individuals_per_step.len();
    if nt == 0 || nt != params.generations.len() {
        bail!(
            "{} sample sizes but {} generations",
            nt,
            params.generations.len()
        );
    }
    if params.num_pops == 0 || params.num_loci == 0 || params.pop_size == 0 {
        bail!("need at least one population, one locus and a positive population size");
    }
    if !(0.0..=1.0).contains(&params.hemizygous_fraction) {
        bail!(
            "hemizygous fraction {} is not in [0, 1]",
            params.hemizygous_fraction
        );
    }
    if !(params.freq_min > 0.0 && params.freq_min < params.freq_max && params.freq_max < 1.0) {
        bail!(
            "invalid initial frequency range: [{}, {}]",
            params.freq_min,
            params.freq_max
        );
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let (kk, nl) = (params.num_pops, params.num_loci);

    // ── Step 1: initial frequencies ──────────────────────────────────────
    let init_dist = Uniform::new(params.freq_min, params.freq_max)?;
    let mut current = Array2::from_shape_fn((kk, nl), |_| init_dist.sample(&mut rng));

    // ── Step 2: drift to each sampling time ──────────────────────────────
    let copies = 2 * params.pop_size as u64;
    let mut freqs = Array3::zeros((nt, kk, nl));
    let mut generation = 0;

    for (t, &target) in params.generations.iter().enumerate() {
        if t > 0 && target <= generation {
            bail!("generations must increase: {} after {}", target, generation);
        }
        while generation < target {
            for f in current.iter_mut() {
                let count = Binomial::new(copies, *f)?.sample(&mut rng);
                *f = count as f64 / copies as f64;
            }
            generation += 1;
        }
        freqs.index_axis_mut(Axis(0), t).assign(&current);
    }

    // ── Step 3: admixed individuals ──────────────────────────────────────
    let gamma = Gamma::new(params.dirichlet_alpha, 1.0)?;
    let total: usize = params.individuals_per_step.iter().sum();
    let mut proportions = Array2::zeros((total, kk));
    let mut genotypes = Vec::with_capacity(nt);
    let mut hemizygous = vec![];

    let mut i = 0;
    for (t, &nd) in params.individuals_per_step.iter().enumerate() {
        let mut x_t = Array2::<u8>::zeros((nd, nl));
        for d in 0..nd {
            let mut pi = Array1::from_shape_fn(kk, |_| gamma.sample(&mut rng).max(f64::MIN_POSITIVE));
            pi /= pi.sum();

            let hemi = rng.random_bool(params.hemizygous_fraction);
            if hemi {
                hemizygous.push((t, d));
            }

            for l in 0..nl {
                let p = pi.dot(&freqs.slice(s![t, .., l])).clamp(0.0, 1.0);
                x_t[(d, l)] = if hemi {
                    2 * rng.random_bool(p) as u8
                } else {
                    Binomial::new(2, p)?.sample(&mut rng) as u8
                };
            }
            proportions.row_mut(i).assign(&pi);
            i += 1;
        }
        genotypes.push(x_t);
    }

    let generations = params.generations.iter().map(|&g| g as f64).collect();
    let mut data = GenotypeTensor::new(genotypes, generations)?;
    for (t, d) in hemizygous {
        data.set_hemizygous(t, d, true);
    }

    Ok(SimulatedAdmixture {
        data,
        freqs,
        proportions,
    })
}
