//! Variational parameters and per-individual counters.
//!
//! Layouts (row-major):
//! - `theta`, `phi`, `zeta`: `T x D_max x K`
//! - `freq_mean`, `freq_var`: `T x K x L`
//! - `initial_freq`: `K x L`
//! - `pseudo_outputs`: `K x L x T`
//! - `nloci_indv`, `sample_iter`: `T x D_max`
//!
//! Rows `d >= D_t` of a time step are padding and never touched.

use crate::genotype::GenotypeData;
use crate::label::{Label, Membership};
use ndarray::prelude::*;
use rand::Rng;
use rand_distr::{Distribution, Gamma};

/// How theta and the pseudo-outputs are seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitScheme {
    /// theta ~ Gamma(0.65 n_l / 100, 100), pseudo-outputs ~ U(0.2, 0.8)
    Batch,
    /// theta ~ Gamma(10, 10), pseudo-outputs at the initial frequency
    Stochastic,
}

const INIT_FREQ_RANGE: std::ops::Range<f64> = 0.2..0.8;

#[derive(Debug, Clone)]
pub struct VariationalState {
    pub theta: Array3<f64>,
    pub phi: Array3<f64>,
    pub zeta: Array3<f64>,
    pub freq_mean: Array3<f64>,
    pub freq_var: Array3<f64>,
    pub initial_freq: Array2<f64>,
    pub pseudo_outputs: Array3<f64>,
    pub nloci_indv: Array2<usize>,
    pub sample_iter: Array2<u64>,
}

impl VariationalState {
    /// Allocate every array once, sized from the data accessor
    pub fn allocate<G: GenotypeData + ?Sized>(data: &G, num_pops: usize) -> Self {
        let nt = data.num_time_steps();
        let nd = data.max_individuals();
        let nl = data.num_loci();
        let kk = num_pops;

        Self {
            theta: Array3::ones((nt, nd, kk)),
            phi: Array3::from_elem((nt, nd, kk), 1.0 / kk as f64),
            zeta: Array3::from_elem((nt, nd, kk), 1.0 / kk as f64),
            freq_mean: Array3::zeros((nt, kk, nl)),
            freq_var: Array3::zeros((nt, kk, nl)),
            initial_freq: Array2::zeros((kk, nl)),
            pseudo_outputs: Array3::zeros((kk, nl, nt)),
            nloci_indv: Array2::zeros((nt, nd)),
            sample_iter: Array2::zeros((nt, nd)),
        }
    }

    pub fn num_pops(&self) -> usize {
        self.theta.dim().2
    }

    /// Draw a fresh starting point.
    ///
    /// Every call consumes `rng` in the same order, so restarts from one
    /// seeded stream are reproducible.
    pub fn initialize<G, R>(
        &mut self,
        data: &G,
        labels: &Array2<Label>,
        pop_size: f64,
        scheme: InitScheme,
        rng: &mut R,
    ) -> anyhow::Result<()>
    where
        G: GenotypeData + ?Sized,
        R: Rng,
    {
        let nt = data.num_time_steps();
        let nl = data.num_loci();
        let kk = self.num_pops();

        for t in 0..nt {
            for d in 0..data.num_individuals(t) {
                self.nloci_indv[(t, d)] = (0..nl).filter(|&l| !data.hidden(t, d, l)).count();
                self.sample_iter[(t, d)] = 0;
            }
        }

        for f in self.initial_freq.iter_mut() {
            *f = rng.random_range(INIT_FREQ_RANGE);
        }

        let prior_var = 1.0 / (12.0 * pop_size);

        for t in 0..nt {
            self.freq_mean
                .index_axis_mut(Axis(0), t)
                .assign(&self.initial_freq);
            self.freq_var.index_axis_mut(Axis(0), t).fill(prior_var);

            for d in 0..data.num_individuals(t) {
                let gamma = match scheme {
                    InitScheme::Stochastic => Some(Gamma::new(10.0, 10.0)?),
                    InitScheme::Batch => {
                        let shape = 0.65 * self.nloci_indv[(t, d)] as f64 / 100.0;
                        if shape > 0.0 {
                            Some(Gamma::new(shape, 100.0)?)
                        } else {
                            None
                        }
                    }
                };

                for k in 0..kk {
                    self.theta[(t, d, k)] = match (labels[(t, d)].membership(k), gamma.as_ref()) {
                        (Membership::Excluded, _) | (_, None) => 1.0,
                        (_, Some(gamma)) => gamma.sample(rng).max(1.0),
                    };
                    self.phi[(t, d, k)] = 1.0 / kk as f64;
                    self.zeta[(t, d, k)] = 1.0 / kk as f64;
                }
            }
        }

        match scheme {
            InitScheme::Batch => {
                for y in self.pseudo_outputs.iter_mut() {
                    *y = rng.random_range(INIT_FREQ_RANGE);
                }
            }
            InitScheme::Stochastic => {
                for ((k, l, _), y) in self.pseudo_outputs.indexed_iter_mut() {
                    *y = self.initial_freq[(k, l)];
                }
            }
        }

        Ok(())
    }

    /// Normalized admixture proportions of individual `(t, d)`
    pub fn proportions(&self, t: usize, d: usize) -> Array1<f64> {
        let theta = self.theta.slice(s![t, d, ..]);
        let total = theta.sum();
        theta.mapv(|x| x / total)
    }

    /// Mean absolute difference of theta against an earlier copy, over
    /// the individuals present in the data
    pub fn mean_abs_theta_change<G: GenotypeData + ?Sized>(
        &self,
        data: &G,
        previous: &Array3<f64>,
    ) -> f64 {
        let mut delta = 0.0;
        let mut count = 0usize;
        for t in 0..data.num_time_steps() {
            let nd = data.num_individuals(t);
            let now = self.theta.slice(s![t, ..nd, ..]);
            let before = previous.slice(s![t, ..nd, ..]);
            delta += (&now - &before).mapv(f64::abs).sum();
            count += now.len();
        }
        if count > 0 {
            delta / count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotype::GenotypeTensor;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn toy() -> GenotypeTensor {
        let mut data = GenotypeTensor::new(
            vec![
                Array2::from_elem((3, 200), 1u8),
                Array2::from_elem((2, 200), 2u8),
            ],
            vec![0.0, 20.0],
        )
        .unwrap();
        for l in 0..50 {
            data.set_missing(0, 1, l);
        }
        data
    }

    #[test]
    fn initialization_respects_ranges_and_labels() -> anyhow::Result<()> {
        let data = toy();
        let mut labels = Array2::from_elem((2, 3), Label::Unlabeled);
        labels[(1, 0)] = Label::Assigned(1);

        let mut state = VariationalState::allocate(&data, 3);
        let mut rng = StdRng::seed_from_u64(1);
        state.initialize(&data, &labels, 1000.0, InitScheme::Batch, &mut rng)?;

        assert_eq!(state.nloci_indv[(0, 0)], 200);
        assert_eq!(state.nloci_indv[(0, 1)], 150);
        assert!(state.initial_freq.iter().all(|&f| (0.2..0.8).contains(&f)));
        assert!(state.pseudo_outputs.iter().all(|&y| (0.2..0.8).contains(&y)));
        assert!(state.theta.iter().all(|&x| x >= 1.0));
        assert_eq!(state.theta[(1, 0, 0)], 1.0);
        assert_eq!(state.theta[(1, 0, 2)], 1.0);
        approx::assert_abs_diff_eq!(state.freq_var[(1, 2, 7)], 1.0 / 12000.0);
        approx::assert_abs_diff_eq!(state.freq_mean[(1, 2, 7)], state.initial_freq[(2, 7)]);
        approx::assert_abs_diff_eq!(state.phi[(0, 2, 1)], 1.0 / 3.0);
        Ok(())
    }

    #[test]
    fn stochastic_scheme_seeds_pseudo_outputs_at_initial_frequency() -> anyhow::Result<()> {
        let data = toy();
        let labels = Array2::from_elem((2, 3), Label::Unlabeled);
        let mut state = VariationalState::allocate(&data, 2);
        let mut rng = StdRng::seed_from_u64(3);
        state.initialize(&data, &labels, 1000.0, InitScheme::Stochastic, &mut rng)?;

        for k in 0..2 {
            for l in 0..200 {
                for t in 0..2 {
                    assert_eq!(state.pseudo_outputs[(k, l, t)], state.initial_freq[(k, l)]);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn same_seed_same_start() -> anyhow::Result<()> {
        let data = toy();
        let labels = Array2::from_elem((2, 3), Label::Unlabeled);
        let mut a = VariationalState::allocate(&data, 2);
        let mut b = VariationalState::allocate(&data, 2);
        a.initialize(&data, &labels, 100.0, InitScheme::Batch, &mut StdRng::seed_from_u64(9))?;
        b.initialize(&data, &labels, 100.0, InitScheme::Batch, &mut StdRng::seed_from_u64(9))?;
        assert_eq!(a.theta, b.theta);
        assert_eq!(a.pseudo_outputs, b.pseudo_outputs);
        Ok(())
    }

    #[test]
    fn proportions_sum_to_one() {
        let data = toy();
        let mut state = VariationalState::allocate(&data, 3);
        state.theta[(0, 1, 0)] = 2.0;
        state.theta[(0, 1, 1)] = 6.0;
        state.theta[(0, 1, 2)] = 2.0;
        let p = state.proportions(0, 1);
        approx::assert_abs_diff_eq!(p.sum(), 1.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(p[1], 0.6, epsilon = 1e-12);
    }
}
