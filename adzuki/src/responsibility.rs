//! Local responsibilities `phi` (derived allele) and `zeta` (ancestral
//! allele) at one locus.
//!
//! For an unlabeled individual the log-scale scores are
//!
//! ```text
//! log phi[k]  = digamma(theta[k]) + log m[k] - v[k] / (2 m[k]^2)
//! log zeta[k] = digamma(theta[k]) + log(1 - m[k])
//! ```
//!
//! where `(m, v)` are the Gaussian moments of the allele frequency; the
//! last term of `phi` is the second-order correction to `E[log f]`.

use crate::genotype::GenotypeData;
use crate::label::{Label, Membership};
use crate::numeric::{clip_freq, digamma, normalize_log_weights, RESPONSIBILITY_FLOOR};
use crate::state::VariationalState;
use ndarray::prelude::*;
use ndarray::Zip;
use rayon::prelude::*;

/// Responsibility settings of one inference regime.
#[derive(Debug, Clone, Copy)]
pub struct ResponsibilityRule {
    /// Per-entry change below which an individual has converged
    pub tol: f64,
    /// Weight given to populations a label excludes
    pub excluded_weight: f64,
}

/// Recompute one individual's `phi` and `zeta` rows.
pub fn update_individual(
    mut phi: ArrayViewMut1<f64>,
    mut zeta: ArrayViewMut1<f64>,
    theta: ArrayView1<f64>,
    mean: ArrayView1<f64>,
    var: ArrayView1<f64>,
    label: Label,
    excluded_weight: f64,
) {
    let kk = theta.len();
    let assigned_log = (1.0 - (kk as f64 - 1.0) * RESPONSIBILITY_FLOOR).ln();
    let excluded_log = excluded_weight.ln();

    let mut log_phi = vec![0.0; kk];
    let mut log_zeta = vec![0.0; kk];

    for k in 0..kk {
        match label.membership(k) {
            Membership::Excluded => {
                log_phi[k] = excluded_log;
                log_zeta[k] = excluded_log;
            }
            Membership::Assigned => {
                log_phi[k] = assigned_log;
                log_zeta[k] = assigned_log;
            }
            Membership::Free => {
                let m = clip_freq(mean[k]);
                let dg = digamma(theta[k]);
                log_phi[k] = dg + m.ln() - var[k] / (2.0 * m * m);
                log_zeta[k] = dg + (1.0 - m).ln();
            }
        }
    }

    normalize_log_weights(&mut log_phi);
    normalize_log_weights(&mut log_zeta);

    phi.assign(&ArrayView1::from(&log_phi[..]));
    zeta.assign(&ArrayView1::from(&log_zeta[..]));
}

/// Update responsibilities of every non-hidden individual at `locus`.
///
/// Individuals within a time step are processed in parallel. Returns
/// true if no entry of any individual moved by `rule.tol` or more.
pub fn update_responsibilities<G: GenotypeData + ?Sized>(
    data: &G,
    state: &mut VariationalState,
    labels: &Array2<Label>,
    locus: usize,
    rule: &ResponsibilityRule,
) -> bool {
    sweep(data, state, labels, locus, rule.excluded_weight, Some(rule.tol))
}

/// One pass of responsibility updates at `locus` without a convergence
/// test.
pub fn load_responsibilities<G: GenotypeData + ?Sized>(
    data: &G,
    state: &mut VariationalState,
    labels: &Array2<Label>,
    locus: usize,
    excluded_weight: f64,
) {
    sweep(data, state, labels, locus, excluded_weight, None);
}

fn sweep<G: GenotypeData + ?Sized>(
    data: &G,
    state: &mut VariationalState,
    labels: &Array2<Label>,
    locus: usize,
    excluded_weight: f64,
    tol: Option<f64>,
) -> bool {
    let VariationalState {
        theta,
        phi,
        zeta,
        freq_mean,
        freq_var,
        ..
    } = state;

    let mut converged = true;

    for t in 0..data.num_time_steps() {
        let nd = data.num_individuals(t);
        if nd == 0 {
            continue;
        }

        let mean = freq_mean.slice(s![t, .., locus]);
        let var = freq_var.slice(s![t, .., locus]);
        let theta_t = theta.slice(s![t, ..nd, ..]);
        let labels_t = labels.slice(s![t, ..nd]);
        let mut phi_t = phi.slice_mut(s![t, ..nd, ..]);
        let mut zeta_t = zeta.slice_mut(s![t, ..nd, ..]);

        let step_converged = Zip::indexed(phi_t.rows_mut())
            .and(zeta_t.rows_mut())
            .and(theta_t.rows())
            .and(&labels_t)
            .into_par_iter()
            .map(|(d, mut phi_row, mut zeta_row, theta_row, &label)| {
                if data.hidden(t, d, locus) {
                    return true;
                }

                let prev_phi = phi_row.to_owned();
                let prev_zeta = zeta_row.to_owned();

                update_individual(
                    phi_row.view_mut(),
                    zeta_row.view_mut(),
                    theta_row,
                    mean.view(),
                    var.view(),
                    label,
                    excluded_weight,
                );

                match tol {
                    Some(tol) => {
                        Zip::from(&prev_phi)
                            .and(&phi_row)
                            .all(|&a, &b| (a - b).abs() < tol)
                            && Zip::from(&prev_zeta)
                                .and(&zeta_row)
                                .all(|&a, &b| (a - b).abs() < tol)
                    }
                    None => true,
                }
            })
            .reduce(|| true, |a, b| a && b);

        converged = converged && step_converged;
    }

    converged
}
