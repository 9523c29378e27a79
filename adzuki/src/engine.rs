//! The inference loop shared by the batch and stochastic regimes.
//!
//! 1. **Initialization**: draw a starting state from the seeded RNG,
//!    optionally keeping the best of several short restarts.
//! 2. **Sweep**: sample a locus, alternate responsibilities and frequency
//!    trajectories at that locus until the responsibilities settle, then
//!    take one natural-gradient step on the mixture pseudo-counts.
//! 3. **Diagnostics**: ELBO and held-out predictive log-likelihood.

use crate::frequency::update_frequencies;
use crate::genotype::GenotypeData;
use crate::label::{label_table, Label};
use crate::mixture::{update_mixture_proportions, StepSchedule};
use crate::objective::{compute_ho_log_likelihood, compute_objective};
use crate::options::InferenceOptions;
use crate::output::{check_sample_order, write_checkpoint, write_frequencies, write_proportions};
use crate::regime::{InferenceRegime, StopRule};
use crate::responsibility::update_responsibilities;
use crate::smoother::{SmootherFactory, VariationalKalman};
use crate::state::VariationalState;

use anyhow::bail;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info, warn};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Summary of one [`Engine::run`]
#[derive(Debug, Clone, Default)]
pub struct InferenceReport {
    /// Outer iterations, one sampled locus each
    pub iterations: usize,
    /// Whether a theta-change stop rule was satisfied
    pub converged: bool,
    /// Mean absolute theta change at the last check
    pub last_theta_delta: Option<f64>,
    pub elbo: Option<f64>,
    pub hold_out_log_likelihood: Option<f64>,
}

pub struct Engine<'a, G, R, S = VariationalKalman>
where
    G: GenotypeData + ?Sized,
    R: InferenceRegime,
    S: SmootherFactory,
{
    data: &'a G,
    options: InferenceOptions,
    regime: R,
    smoother: S,
    labels: Array2<Label>,
    prior: Vec<f64>,
    schedule: StepSchedule,
    state: VariationalState,
    rng: StdRng,
}

impl<'a, G, R> Engine<'a, G, R, VariationalKalman>
where
    G: GenotypeData + ?Sized,
    R: InferenceRegime,
{
    /// Validate the inputs and draw the initial state, using the default
    /// Kalman smoother
    pub fn new(data: &'a G, options: InferenceOptions, regime: R) -> anyhow::Result<Self> {
        Self::with_smoother(data, options, regime, VariationalKalman::default())
    }
}

impl<'a, G, R, S> Engine<'a, G, R, S>
where
    G: GenotypeData + ?Sized,
    R: InferenceRegime,
    S: SmootherFactory,
{
    pub fn with_smoother(
        data: &'a G,
        options: InferenceOptions,
        regime: R,
        smoother: S,
    ) -> anyhow::Result<Self> {
        options.validate()?;

        let nt = data.num_time_steps();
        if nt == 0 {
            bail!("need at least one time step");
        }
        if data.num_loci() == 0 {
            bail!("need at least one locus");
        }
        for t in 1..nt {
            if data.generation(t) <= data.generation(t - 1) {
                bail!("generation times must increase at time step {}", t);
            }
        }

        if let Some(order) = options.sample_order.as_deref() {
            check_sample_order(data, order)?;
        }

        let labels = label_table(
            options.labels.as_ref(),
            options.use_labels,
            (nt, data.max_individuals()),
            options.num_pops,
        )?;
        let prior = options.prior()?;
        let schedule = regime.step_schedule(&options);

        let mut state = VariationalState::allocate(data, options.num_pops);
        let mut rng = StdRng::seed_from_u64(options.seed);
        state.initialize(data, &labels, options.pop_size, regime.init_scheme(), &mut rng)?;

        info!(
            "{}: T={}, N={}, L={}, K={}, pop_size={}",
            regime.name(),
            nt,
            data.total_individuals(),
            data.num_loci(),
            options.num_pops,
            options.pop_size
        );

        Ok(Engine {
            data,
            options,
            regime,
            smoother,
            labels,
            prior,
            schedule,
            state,
            rng,
        })
    }

    /// Bring `locus` to a local fixed point, then update theta.
    /// Returns the number of inner alternations.
    pub fn step_locus(&mut self, locus: usize) -> usize {
        let rule = self.regime.responsibility_rule();
        let mut inner = 0;
        loop {
            inner += 1;
            let converged =
                update_responsibilities(self.data, &mut self.state, &self.labels, locus, &rule);
            update_frequencies(
                self.data,
                &mut self.state,
                &self.smoother,
                self.options.pop_size,
                locus,
            );
            if converged {
                break;
            }
            if inner >= self.options.max_inner_iter {
                warn!(
                    "locus {}: responsibilities still moving after {} alternations",
                    locus, inner
                );
                break;
            }
        }

        update_mixture_proportions(self.data, &mut self.state, &self.prior, locus, &self.schedule);
        inner
    }

    fn sample_locus(&mut self) -> usize {
        self.rng.random_range(0..self.data.num_loci())
    }

    /// ELBO of the current state; refreshes every locus on the way
    pub fn objective(&mut self) -> f64 {
        compute_objective(
            self.data,
            &mut self.state,
            &self.labels,
            &self.prior,
            &self.smoother,
            self.options.pop_size,
            self.regime.responsibility_rule().excluded_weight,
        )
    }

    pub fn hold_out_log_likelihood(&self) -> f64 {
        compute_ho_log_likelihood(self.data, &self.state)
    }

    /// Run `num_starts` short restarts of one pass over the loci each and
    /// keep the one with the highest ELBO. Returns that ELBO.
    pub fn find_best_initialization(&mut self, num_starts: usize) -> anyhow::Result<f64> {
        if num_starts == 0 {
            bail!("need at least one start");
        }
        info!("trying {} initializations", num_starts);

        let nl = self.data.num_loci();
        let mut best: Option<(f64, VariationalState)> = None;

        for n in 0..num_starts {
            if n > 0 {
                self.state.initialize(
                    self.data,
                    &self.labels,
                    self.options.pop_size,
                    self.regime.init_scheme(),
                    &mut self.rng,
                )?;
            }
            for _ in 0..nl {
                let locus = self.sample_locus();
                self.step_locus(locus);
            }

            let obj = self.objective();
            info!("init {}: objective {:.6}", n + 1, obj);

            if best.as_ref().is_none_or(|(best_obj, _)| obj > *best_obj) {
                best = Some((obj, self.state.clone()));
            }
        }

        match best {
            Some((obj, state)) => {
                self.state = state;
                Ok(obj)
            }
            None => bail!("no initialization was scored"),
        }
    }

    /// Run the regime to completion
    pub fn run(&mut self) -> anyhow::Result<InferenceReport> {
        if let Some(num_starts) = self.regime.multi_start(&self.options) {
            self.find_best_initialization(num_starts)?;
        }

        info!("running {}", self.regime.name());

        let mut report = match self.regime.stop_rule(&self.options) {
            StopRule::ThetaDelta { tol, check_every } => self.sweep_until_stable(tol, check_every)?,
            StopRule::Epochs { num_epochs } => self.sweep_epochs(num_epochs)?,
        };

        if self.regime.reports_elbo() {
            let elbo = self.objective();
            info!("objective: {:.10}", elbo);
            report.elbo = Some(elbo);
        }

        if self.regime.always_reports_hold_out() || self.data.has_hold_out() {
            let llik = self.hold_out_log_likelihood();
            info!("hold out log likelihood: {:.10}", llik);
            report.hold_out_log_likelihood = Some(llik);
        }

        Ok(report)
    }

    fn progress_bar(&self, len: Option<usize>) -> ProgressBar {
        let pb = match len {
            Some(len) => ProgressBar::new(len as u64),
            None => ProgressBar::new_spinner(),
        };
        if !self.options.show_progress || log::log_enabled!(log::Level::Info) {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        pb
    }

    fn checkpoint(&self) -> anyhow::Result<()> {
        if let Some(path) = self.options.checkpoint.as_ref() {
            let file = path.to_string_lossy();
            write_checkpoint(
                self.data,
                &self.state.theta,
                self.options.sample_order.as_deref(),
                &file,
            )?;
            debug!("wrote checkpoint {}", file);
        }
        Ok(())
    }

    fn sweep_until_stable(&mut self, tol: f64, check_every: usize) -> anyhow::Result<InferenceReport> {
        let nl = self.data.num_loci();
        let pb = self.progress_bar(None);

        let mut prev_theta = self.state.theta.clone();
        let mut it = 0;
        let mut converged = false;
        let mut delta = None;

        while it < nl || !converged {
            it += 1;
            let locus = self.sample_locus();
            self.step_locus(locus);
            pb.inc(1);

            if it % check_every == 0 || it == 1 {
                let d = self.state.mean_abs_theta_change(self.data, &prev_theta);
                prev_theta.assign(&self.state.theta);
                converged = d < tol;
                delta = Some(d);
                info!(
                    "iteration {}, step size {:.6}, delta {:.6}",
                    it,
                    self.schedule.step_size(it as u64),
                    d
                );
                self.checkpoint()?;
            }
        }
        pb.finish_and_clear();

        Ok(InferenceReport {
            iterations: it,
            converged,
            last_theta_delta: delta,
            ..Default::default()
        })
    }

    fn sweep_epochs(&mut self, num_epochs: usize) -> anyhow::Result<InferenceReport> {
        let nl = self.data.num_loci();
        let total = num_epochs * nl;
        let pb = self.progress_bar(Some(total));

        let mut prev_theta = self.state.theta.clone();
        let mut delta = None;

        for it in 1..=total {
            let locus = self.sample_locus();
            self.step_locus(locus);
            pb.inc(1);

            if it % nl == 0 {
                let d = self.state.mean_abs_theta_change(self.data, &prev_theta);
                prev_theta.assign(&self.state.theta);
                delta = Some(d);
                info!("epoch {}, delta {:.6}", it / nl, d);
                self.checkpoint()?;
            }
        }
        pb.finish_and_clear();

        Ok(InferenceReport {
            iterations: total,
            converged: false,
            last_theta_delta: delta,
            ..Default::default()
        })
    }

    pub fn state(&self) -> &VariationalState {
        &self.state
    }

    pub fn labels(&self) -> &Array2<Label> {
        &self.labels
    }

    pub fn options(&self) -> &InferenceOptions {
        &self.options
    }

    /// `T x K x L` frequency means
    pub fn frequencies(&self) -> &Array3<f64> {
        &self.state.freq_mean
    }

    /// Normalized admixture proportions of individual `(t, d)`
    pub fn proportions(&self, t: usize, d: usize) -> Array1<f64> {
        self.state.proportions(t, d)
    }

    /// Write `{out}_freqs` and `{out}_theta`. Proportions follow the
    /// configured sample order, or `(t, d)` order without one.
    pub fn write_results(&self, out: &str) -> anyhow::Result<()> {
        write_frequencies(&self.state.freq_mean, &format!("{}_freqs", out))?;
        write_proportions(
            self.data,
            &self.state.theta,
            self.options.sample_order.as_deref(),
            &format!("{}_theta", out),
        )?;
        Ok(())
    }
}
