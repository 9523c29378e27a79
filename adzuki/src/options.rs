use crate::numeric::RESPONSIBILITY_FLOOR;
use ndarray::Array2;
use std::path::PathBuf;

/// Options shared by the batch (CAVI) and stochastic (SVI) drivers.
#[derive(Debug, Clone)]
pub struct InferenceOptions {
    /// Number of latent populations K. Default: 2
    pub num_pops: usize,
    /// Dirichlet prior on admixture proportions, one entry per
    /// population. Empty means 1.0 for every population. Default: empty
    pub mixture_prior: Vec<f64>,
    /// Effective population size scaling the drift variance. Default: 5000
    pub pop_size: f64,
    /// Number of passes over the loci (SVI only). Default: 50
    pub num_epochs: usize,
    /// `T x D_max` supervised labels, -1 for unlabeled. Default: None
    pub labels: Option<Array2<i32>>,
    /// Whether `labels` constrain the fit. Default: false
    pub use_labels: bool,
    /// Pick the best of several short restarts before the main run (SVI
    /// only). Default: false
    pub multi_init: bool,
    /// Number of restarts tried by `multi_init`. Default: 5
    pub num_starts: usize,
    /// Mean absolute theta change declaring convergence (CAVI only). Default: 1.0
    pub theta_tol: f64,
    /// Iterations between theta checks and checkpoints (CAVI only). Default: 1000
    pub check_every: usize,
    /// Exponent of the SVI step size `(n + 1)^step_power`. Default: -0.5
    pub step_power: f64,
    /// Cap on responsibility/frequency alternations at one locus. Default: 1000
    pub max_inner_iter: usize,
    /// Random seed. Default: 42
    pub seed: u64,
    /// Where to write raw theta checkpoints. Default: None
    pub checkpoint: Option<PathBuf>,
    /// Row order `(time step, individual)` of written proportions and
    /// checkpoints; must list every individual once. Default: None
    pub sample_order: Option<Vec<(usize, usize)>>,
    /// Show a progress bar over outer iterations. Default: false
    pub show_progress: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        InferenceOptions {
            num_pops: 2,
            mixture_prior: vec![],
            pop_size: 5000.0,
            num_epochs: 50,
            labels: None,
            use_labels: false,
            multi_init: false,
            num_starts: 5,
            theta_tol: 1.0,
            check_every: 1000,
            step_power: -0.5,
            max_inner_iter: 1000,
            seed: 42,
            checkpoint: None,
            sample_order: None,
            show_progress: false,
        }
    }
}

impl InferenceOptions {
    /// Prior vector of length K, filling in the flat default
    pub fn prior(&self) -> anyhow::Result<Vec<f64>> {
        if self.mixture_prior.is_empty() {
            return Ok(vec![1.0; self.num_pops]);
        }
        if self.mixture_prior.len() != self.num_pops {
            anyhow::bail!(
                "mixture prior has {} entries for {} populations",
                self.mixture_prior.len(),
                self.num_pops
            );
        }
        if self.mixture_prior.iter().any(|&a| !(a > 0.0)) {
            anyhow::bail!("mixture prior entries must be positive");
        }
        Ok(self.mixture_prior.clone())
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.num_pops < 1 {
            anyhow::bail!("need at least one population");
        }
        // a label keeps 1 - (K - 1) * floor on its own population
        if (self.num_pops as f64 - 1.0) * RESPONSIBILITY_FLOOR >= 1.0 {
            anyhow::bail!(
                "at most {} populations are supported",
                (1.0 / RESPONSIBILITY_FLOOR) as usize
            );
        }
        if !(self.pop_size > 0.0) {
            anyhow::bail!("effective population size must be positive");
        }
        if self.check_every == 0 {
            anyhow::bail!("check_every must be positive");
        }
        if self.max_inner_iter == 0 {
            anyhow::bail!("max_inner_iter must be positive");
        }
        if self.multi_init && self.num_starts == 0 {
            anyhow::bail!("multi-start initialization needs at least one start");
        }
        self.prior()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn population_count_is_bounded_by_the_responsibility_floor() {
        let ok = InferenceOptions {
            num_pops: 10_000,
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let too_many = InferenceOptions {
            num_pops: 10_001,
            ..Default::default()
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn prior_fills_in_the_flat_default() {
        let options = InferenceOptions {
            num_pops: 3,
            ..Default::default()
        };
        assert_eq!(options.prior().unwrap(), vec![1.0; 3]);

        let negative = InferenceOptions {
            mixture_prior: vec![1.0, -1.0],
            ..Default::default()
        };
        assert!(negative.prior().is_err());
    }
}
