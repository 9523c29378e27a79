//! Evidence lower bound and held-out predictive log-likelihood.

use crate::frequency::update_frequencies;
use crate::genotype::GenotypeData;
use crate::label::Label;
use crate::numeric::{clip_freq, digamma, ln_gamma};
use crate::responsibility::load_responsibilities;
use crate::smoother::SmootherFactory;
use crate::state::VariationalState;
use ndarray::prelude::*;

/// Predicted allele frequencies are kept inside this range
pub const PREDICTIVE_RANGE: (f64, f64) = (0.001, 0.999);

/// Evidence lower bound of the current state.
///
/// Refreshes the responsibilities and frequency trajectories of every
/// locus on the way, so the state is modified.
pub fn compute_objective<G, S>(
    data: &G,
    state: &mut VariationalState,
    labels: &Array2<Label>,
    prior: &[f64],
    factory: &S,
    pop_size: f64,
    excluded_weight: f64,
) -> f64
where
    G: GenotypeData + ?Sized,
    S: SmootherFactory,
{
    let nt = data.num_time_steps();
    let trans_var = transition_variances(data, pop_size);

    let mut elbo = 0.0;

    for l in 0..data.num_loci() {
        load_responsibilities(data, state, labels, l, excluded_weight);
        update_frequencies(data, state, factory, pop_size, l);

        for t in 0..nt {
            elbo += transition_term(state, &trans_var, t, l);

            for d in 0..data.num_individuals(t) {
                if data.hidden(t, d, l) {
                    continue;
                }
                elbo += expected_log_likelihood(data, state, t, d, l);
            }
        }
    }

    for t in 0..nt {
        for d in 0..data.num_individuals(t) {
            elbo += dirichlet_term(state.theta.slice(s![t, d, ..]), prior);
        }
    }

    elbo
}

/// Drift variance entering each time step: `1/(12N)` at the first step
/// and `(gen[t] - gen[t-1])/(12N)` after it
fn transition_variances<G: GenotypeData + ?Sized>(data: &G, pop_size: f64) -> Vec<f64> {
    let drift = 1.0 / (12.0 * pop_size);
    (0..data.num_time_steps())
        .map(|t| {
            if t == 0 {
                drift
            } else {
                (data.generation(t) - data.generation(t - 1)) * drift
            }
        })
        .collect()
}

/// Gaussian transition and entropy contribution of step `t` at locus
/// `l`, summed over populations. The first step moves away from the
/// initial mean with no variance of its own.
fn transition_term(state: &VariationalState, trans_var: &[f64], t: usize, l: usize) -> f64 {
    let var = trans_var[t];
    let mut ret = 0.0;
    for k in 0..state.num_pops() {
        let (m_prev, v_prev) = if t == 0 {
            (state.initial_freq[(k, l)], 0.0)
        } else {
            (state.freq_mean[(t - 1, k, l)], state.freq_var[(t - 1, k, l)])
        };
        let (m, v) = (state.freq_mean[(t, k, l)], state.freq_var[(t, k, l)]);
        ret += -(m - m_prev).powi(2) / (2.0 * var) - v / (2.0 * var) - v_prev / (2.0 * var);
        ret += 0.5 * v.ln();
    }
    ret
}

fn expected_log_likelihood<G: GenotypeData + ?Sized>(
    data: &G,
    state: &VariationalState,
    t: usize,
    d: usize,
    l: usize,
) -> f64 {
    let x = data.genotype(t, d, l) as f64;
    let w = if data.hemizygous(t, d) { 0.5 } else { 1.0 };
    let theta = state.theta.slice(s![t, d, ..]);
    let dg_sum = digamma(theta.sum());

    let mut ret = 0.0;
    for (k, &th) in theta.iter().enumerate() {
        let m = clip_freq(state.freq_mean[(t, k, l)]);
        let v = state.freq_var[(t, k, l)];
        let phi = state.phi[(t, d, k)];
        let zeta = state.zeta[(t, d, k)];
        let e_log_pi = digamma(th) - dg_sum;

        ret += w * x * (e_log_pi + m.ln() - v / (2.0 * m * m) - phi.ln()) * phi;
        ret += w * (2.0 - x) * (e_log_pi + (1.0 - m).ln() - zeta.ln()) * zeta;
    }
    ret
}

/// `E[log p(pi)] - E[log q(pi)]` of one individual, up to the prior's
/// normalizing constant
fn dirichlet_term(theta: ArrayView1<f64>, prior: &[f64]) -> f64 {
    let total = theta.sum();
    let dg_sum = digamma(total);
    let mut ret = -ln_gamma(total);
    for (&th, &alpha) in theta.iter().zip(prior) {
        let e_log_pi = digamma(th) - dg_sum;
        ret += (alpha - 1.0) * e_log_pi - (th - 1.0) * e_log_pi + ln_gamma(th);
    }
    ret
}

/// Log-likelihood of one held-out genotype given its predicted derived
/// allele frequency `p`.
///
/// Diploid dosages carry the binomial coefficient; hemizygous dosages
/// (0 or 2) are halved.
pub fn hold_out_log_likelihood(x: u8, p: f64, hemizygous: bool) -> f64 {
    let (lb, ub) = PREDICTIVE_RANGE;
    let p = p.clamp(lb, ub);
    let x = x as f64;
    let allele_terms = x * p.ln() + (2.0 - x) * (1.0 - p).ln();
    if hemizygous {
        0.5 * allele_terms
    } else {
        2f64.ln() - x.max(2.0 - x).ln() + allele_terms
    }
}

/// Posterior-predictive log-likelihood of the held-out, non-missing
/// entries under the current state. Reads the state only.
pub fn compute_ho_log_likelihood<G: GenotypeData + ?Sized>(
    data: &G,
    state: &VariationalState,
) -> f64 {
    let mut log_lk = 0.0;

    for t in 0..data.num_time_steps() {
        for d in 0..data.num_individuals(t) {
            let pi = state.proportions(t, d);
            for l in 0..data.num_loci() {
                if !data.hold_out(t, d, l) || data.missing(t, d, l) {
                    continue;
                }
                let p = pi.dot(&state.freq_mean.slice(s![t, .., l]));
                log_lk += hold_out_log_likelihood(data.genotype(t, d, l), p, data.hemizygous(t, d));
            }
        }
    }

    log_lk
}
