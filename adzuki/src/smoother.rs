//! Allele frequency trajectory smoothing for one (population, locus).
//!
//! The engine talks to a smoother through two narrow traits:
//! [`SmootherFactory::build`] binds a smoother to one trajectory,
//! [`TrajectorySmoother::maximize_pseudo_outputs`] iterates it to a fixed
//! point, and the read-back accessors hand the marginals, the updated
//! pseudo-outputs and the re-estimated initial mean back to the engine.
//!
//! The default implementation, [`VariationalKalman`], is a Kalman filter
//! with a Rauch-Tung-Striebel backward pass over the drift model
//!
//! ```text
//! x_0 ~ N(initial_mean, 1 / (12 N))
//! x_t = x_{t-1} + N(0, (gen_t - gen_{t-1}) / (12 N))
//! y_t = x_t + N(0, r_t)
//! ```
//!
//! The pseudo-outputs `y_t` and their variances `r_t` come from a Newton
//! step on the expected genotype log-likelihood
//! `a_t log(x) + b_t log(1 - x)` around the current smoothed mean, where
//! `a_t` and `b_t` are the responsibility-weighted derived and ancestral
//! allele counts at time `t`.

use crate::genotype::GenotypeData;
use crate::numeric::clip_freq;
use ndarray::prelude::*;

/// Variances are kept at least this large
const MIN_VARIANCE: f64 = 1e-12;

/// Inputs binding a smoother to population `population` at `locus`.
pub struct SmootherProblem<'a, G: ?Sized> {
    pub data: &'a G,
    /// Current pseudo-outputs of this trajectory, one per time step
    pub pseudo_outputs: ArrayView1<'a, f64>,
    pub initial_mean: f64,
    /// `T x D_max x K` derived-allele responsibilities
    pub phi: &'a Array3<f64>,
    /// `T x D_max x K` ancestral-allele responsibilities
    pub zeta: &'a Array3<f64>,
    pub pop_size: f64,
    pub population: usize,
    pub locus: usize,
}

/// A smoother bound to one trajectory.
pub trait TrajectorySmoother: Send {
    /// Alternate smoothing and re-fitting the pseudo-outputs until they
    /// stop moving
    fn maximize_pseudo_outputs(&mut self);

    /// Smoothed marginal means, one per time step
    fn marginal_means(&self) -> ArrayView1<'_, f64>;

    /// Smoothed marginal variances, one per time step
    fn marginal_vars(&self) -> ArrayView1<'_, f64>;

    /// Pseudo-outputs at the fixed point
    fn pseudo_outputs(&self) -> ArrayView1<'_, f64>;

    /// Re-estimated mean of the initial state
    fn initial_mean(&self) -> f64;
}

/// Builds one smoother per (population, locus).
pub trait SmootherFactory: Sync {
    type Smoother: TrajectorySmoother;

    fn build<G: GenotypeData + ?Sized>(&self, problem: SmootherProblem<'_, G>) -> Self::Smoother;
}

/// Kalman smoother with linearized genotype pseudo-observations.
#[derive(Debug, Clone)]
pub struct VariationalKalman {
    /// Largest pseudo-output change accepted as a fixed point. Default: 1e-6
    pub tol: f64,
    /// Maximum linearize/smooth alternations. Default: 100
    pub max_iter: usize,
}

impl Default for VariationalKalman {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            max_iter: 100,
        }
    }
}

impl SmootherFactory for VariationalKalman {
    type Smoother = KalmanTrajectory;

    fn build<G: GenotypeData + ?Sized>(&self, problem: SmootherProblem<'_, G>) -> KalmanTrajectory {
        let data = problem.data;
        let nt = data.num_time_steps();
        let (k, l) = (problem.population, problem.locus);

        let mut derived = Array1::zeros(nt);
        let mut ancestral = Array1::zeros(nt);

        for t in 0..nt {
            for d in 0..data.num_individuals(t) {
                if data.hidden(t, d, l) {
                    continue;
                }
                let w = if data.hemizygous(t, d) { 0.5 } else { 1.0 };
                let x = data.genotype(t, d, l) as f64;
                derived[t] += w * x * problem.phi[(t, d, k)];
                ancestral[t] += w * (2.0 - x) * problem.zeta[(t, d, k)];
            }
        }

        let drift = 1.0 / (12.0 * problem.pop_size);
        let process_var = Array1::from_shape_fn(nt, |t| {
            if t == 0 {
                drift
            } else {
                (data.generation(t) - data.generation(t - 1)) * drift
            }
        });

        KalmanTrajectory {
            derived,
            ancestral,
            process_var,
            outputs: problem.pseudo_outputs.to_owned(),
            output_var: Array1::from_elem(nt, f64::INFINITY),
            mean: problem.pseudo_outputs.mapv(clip_freq),
            var: Array1::from_elem(nt, drift),
            initial_mean: problem.initial_mean,
            tol: self.tol,
            max_iter: self.max_iter,
        }
    }
}

/// State of one trajectory fit.
#[derive(Debug, Clone)]
pub struct KalmanTrajectory {
    derived: Array1<f64>,
    ancestral: Array1<f64>,
    process_var: Array1<f64>,
    outputs: Array1<f64>,
    output_var: Array1<f64>,
    mean: Array1<f64>,
    var: Array1<f64>,
    initial_mean: f64,
    tol: f64,
    max_iter: usize,
}

impl KalmanTrajectory {
    /// Newton-step pseudo-observations around the current means.
    /// Returns the largest change of any pseudo-output.
    fn linearize(&mut self) -> f64 {
        let mut change: f64 = 0.0;
        for t in 0..self.outputs.len() {
            let (a, b) = (self.derived[t], self.ancestral[t]);
            if a + b <= 0.0 {
                self.output_var[t] = f64::INFINITY;
                continue;
            }
            let m = clip_freq(self.mean[t]);
            let grad = a / m - b / (1.0 - m);
            let curv = a / (m * m) + b / ((1.0 - m) * (1.0 - m));
            let y = m + grad / curv;
            change = change.max((y - self.outputs[t]).abs());
            self.outputs[t] = y;
            self.output_var[t] = 1.0 / curv;
        }
        change
    }

    /// Forward filter and backward smoothing pass
    fn smooth(&mut self) {
        let nt = self.outputs.len();
        let mut filt_mean = Array1::zeros(nt);
        let mut filt_var = Array1::zeros(nt);
        let mut pred_mean = Array1::zeros(nt);
        let mut pred_var = Array1::zeros(nt);

        for t in 0..nt {
            let (mu, p) = if t == 0 {
                (self.initial_mean, self.process_var[0])
            } else {
                (filt_mean[t - 1], filt_var[t - 1] + self.process_var[t])
            };
            pred_mean[t] = mu;
            pred_var[t] = p;

            let r = self.output_var[t];
            if r.is_finite() {
                let gain = p / (p + r);
                filt_mean[t] = mu + gain * (self.outputs[t] - mu);
                filt_var[t] = p * r / (p + r);
            } else {
                filt_mean[t] = mu;
                filt_var[t] = p;
            }
        }

        let mut mean = filt_mean.clone();
        let mut var = filt_var.clone();
        for t in (0..nt.saturating_sub(1)).rev() {
            let j = if pred_var[t + 1] > 0.0 {
                filt_var[t] / pred_var[t + 1]
            } else {
                1.0
            };
            mean[t] = filt_mean[t] + j * (mean[t + 1] - pred_mean[t + 1]);
            var[t] = filt_var[t] + j * j * (var[t + 1] - pred_var[t + 1]);
        }

        self.mean = mean.mapv_into(clip_freq);
        self.var = var.mapv_into(|v| v.max(MIN_VARIANCE));
    }
}

impl TrajectorySmoother for KalmanTrajectory {
    fn maximize_pseudo_outputs(&mut self) {
        for _ in 0..self.max_iter {
            let change = self.linearize();
            self.smooth();
            if change < self.tol {
                break;
            }
        }
        self.initial_mean = self.mean[0];
    }

    fn marginal_means(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    fn marginal_vars(&self) -> ArrayView1<'_, f64> {
        self.var.view()
    }

    fn pseudo_outputs(&self) -> ArrayView1<'_, f64> {
        self.outputs.view()
    }

    fn initial_mean(&self) -> f64 {
        self.initial_mean
    }
}
