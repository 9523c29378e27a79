use crate::genotype::GenotypeData;
use crate::smoother::{SmootherFactory, SmootherProblem, TrajectorySmoother};
use crate::state::VariationalState;
use ndarray::prelude::*;
use rayon::prelude::*;

/// Refresh the frequency trajectories of every population at `locus`.
///
/// Each population gets its own smoother, fitted in parallel. The
/// marginals, pseudo-outputs and initial mean are written back once all
/// fits are done.
pub fn update_frequencies<G, S>(
    data: &G,
    state: &mut VariationalState,
    factory: &S,
    pop_size: f64,
    locus: usize,
) where
    G: GenotypeData + ?Sized,
    S: SmootherFactory,
{
    let fits: Vec<S::Smoother> = {
        let shared: &VariationalState = state;
        (0..shared.num_pops())
            .into_par_iter()
            .map(|k| {
                let mut smoother = factory.build(SmootherProblem {
                    data,
                    pseudo_outputs: shared.pseudo_outputs.slice(s![k, locus, ..]),
                    initial_mean: shared.initial_freq[(k, locus)],
                    phi: &shared.phi,
                    zeta: &shared.zeta,
                    pop_size,
                    population: k,
                    locus,
                });
                smoother.maximize_pseudo_outputs();
                smoother
            })
            .collect()
    };

    for (k, fit) in fits.iter().enumerate() {
        state
            .freq_mean
            .slice_mut(s![.., k, locus])
            .assign(&fit.marginal_means());
        state
            .freq_var
            .slice_mut(s![.., k, locus])
            .assign(&fit.marginal_vars());
        state
            .pseudo_outputs
            .slice_mut(s![k, locus, ..])
            .assign(&fit.pseudo_outputs());
        state.initial_freq[(k, locus)] = fit.initial_mean();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotype::GenotypeTensor;
    use crate::smoother::VariationalKalman;

    #[test]
    fn only_the_visited_locus_changes() {
        let data = GenotypeTensor::new(
            vec![
                Array2::from_shape_fn((10, 3), |(d, _)| if d < 8 { 2 } else { 0 }),
                Array2::from_shape_fn((10, 3), |(d, _)| if d < 2 { 2 } else { 0 }),
            ],
            vec![0.0, 500.0],
        )
        .unwrap();
        let mut state = VariationalState::allocate(&data, 2);
        state.freq_mean.fill(0.5);
        state.freq_var.fill(1e-4);
        state.initial_freq.fill(0.5);
        state.pseudo_outputs.fill(0.5);

        update_frequencies(&data, &mut state, &VariationalKalman::default(), 1.0, 1);

        for k in 0..2 {
            assert!(state.freq_mean[(0, k, 1)] > 0.6);
            assert!(state.freq_mean[(1, k, 1)] < 0.4);
            approx::assert_abs_diff_eq!(state.initial_freq[(k, 1)], state.freq_mean[(0, k, 1)]);
            for l in [0, 2] {
                assert_eq!(state.freq_mean[(0, k, l)], 0.5);
                assert_eq!(state.pseudo_outputs[(k, l, 1)], 0.5);
            }
        }
    }
}
