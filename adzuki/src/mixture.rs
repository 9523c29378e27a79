//! Stochastic natural-gradient updates of the mixture pseudo-counts.

use crate::genotype::GenotypeData;
use crate::state::VariationalState;

/// Robbins-Monro step size as a function of an individual's visit count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepSchedule {
    /// `(n + 1)^early_power` up to `switch_at` visits, then
    /// `(n - offset)^late_power`. The count `n` is read before the visit
    /// is recorded.
    TwoPhase {
        switch_at: u64,
        offset: u64,
        early_power: f64,
        late_power: f64,
    },
    /// `(n + 1)^power`, with `n` read after the visit is recorded
    Power { power: f64 },
}

impl StepSchedule {
    /// Slow-then-slower decay of the batch driver
    pub fn two_phase() -> Self {
        StepSchedule::TwoPhase {
            switch_at: 10_000,
            offset: 7_825,
            early_power: -0.5,
            late_power: -0.6,
        }
    }

    /// Whether the visit counter moves before the step size is computed
    pub fn counts_visit_first(&self) -> bool {
        matches!(self, StepSchedule::Power { .. })
    }

    pub fn step_size(&self, n: u64) -> f64 {
        match *self {
            StepSchedule::TwoPhase {
                switch_at,
                offset,
                early_power,
                late_power,
            } => {
                if n <= switch_at {
                    ((n + 1) as f64).powf(early_power)
                } else {
                    (n.saturating_sub(offset) as f64).powf(late_power)
                }
            }
            StepSchedule::Power { power } => ((n + 1) as f64).powf(power),
        }
    }
}

/// One natural-gradient step on theta for every individual observed at
/// `locus`.
///
/// The target of the step is the prior plus the locus' expected allele
/// counts scaled up to the individual's number of observed loci.
/// Hemizygous individuals contribute half a count per allele copy.
pub fn update_mixture_proportions<G: GenotypeData + ?Sized>(
    data: &G,
    state: &mut VariationalState,
    prior: &[f64],
    locus: usize,
    schedule: &StepSchedule,
) {
    let kk = state.num_pops();

    for t in 0..data.num_time_steps() {
        for d in 0..data.num_individuals(t) {
            if data.hidden(t, d, locus) {
                continue;
            }

            if schedule.counts_visit_first() {
                state.sample_iter[(t, d)] += 1;
            }
            let step = schedule.step_size(state.sample_iter[(t, d)]);
            if !schedule.counts_visit_first() {
                state.sample_iter[(t, d)] += 1;
            }

            let x = data.genotype(t, d, locus) as f64;
            let w = if data.hemizygous(t, d) { 0.5 } else { 1.0 };
            let scale = state.nloci_indv[(t, d)] as f64;

            for k in 0..kk {
                let expected = w * (x * state.phi[(t, d, k)] + (2.0 - x) * state.zeta[(t, d, k)]);
                let theta = &mut state.theta[(t, d, k)];
                *theta += step * (prior[k] + scale * expected - *theta);
                *theta = (*theta).max(1.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotype::GenotypeTensor;
    use ndarray::prelude::*;

    #[test]
    fn two_phase_schedule_is_nearly_continuous() {
        let schedule = StepSchedule::two_phase();
        let before = schedule.step_size(10_000);
        let after = schedule.step_size(10_001);
        approx::assert_abs_diff_eq!(before, 10_001f64.powf(-0.5));
        approx::assert_abs_diff_eq!(after, 2_176f64.powf(-0.6));
        assert!((before - after).abs() < 1e-4);
        assert_eq!(schedule.step_size(0), 1.0);
    }

    #[test]
    fn power_schedule_counts_first() {
        let schedule = StepSchedule::Power { power: -0.5 };
        assert!(schedule.counts_visit_first());
        assert!(!StepSchedule::two_phase().counts_visit_first());
        approx::assert_abs_diff_eq!(schedule.step_size(3), 0.5);
    }

    fn setup() -> (GenotypeTensor, VariationalState) {
        let mut data = GenotypeTensor::new(
            vec![array![[2u8, 0], [0, 0], [1, 1]]],
            vec![0.0],
        )
        .unwrap();
        data.set_hemizygous(0, 0, true);
        data.set_missing(0, 2, 0);
        let mut state = VariationalState::allocate(&data, 2);
        state.nloci_indv[(0, 0)] = 2;
        state.nloci_indv[(0, 1)] = 2;
        state.nloci_indv[(0, 2)] = 1;
        state.phi.fill(0.5);
        state.zeta.fill(0.5);
        (data, state)
    }

    #[test]
    fn first_visit_jumps_to_the_target() {
        let (data, mut state) = setup();
        update_mixture_proportions(&data, &mut state, &[1.0, 1.0], 0, &StepSchedule::two_phase());

        // step 1: theta = prior + nloci * w * (x phi + (2 - x) zeta)
        approx::assert_abs_diff_eq!(state.theta[(0, 0, 0)], 1.0 + 2.0 * 0.5 * 1.0);
        approx::assert_abs_diff_eq!(state.theta[(0, 1, 1)], 1.0 + 2.0 * 1.0);
        assert_eq!(state.sample_iter[(0, 0)], 1);
        assert_eq!(state.sample_iter[(0, 2)], 0);
        assert_eq!(state.theta[(0, 2, 0)], 1.0);
    }

    #[test]
    fn power_step_uses_the_incremented_count() {
        let (data, mut state) = setup();
        state.theta.fill(5.0);
        let schedule = StepSchedule::Power { power: -0.5 };

        // targets: prior + nloci * w * (x phi + (2 - x) zeta)
        let hemi_target = 1.0 + 2.0 * 0.5 * (2.0 * 0.5);
        let homo_target = 1.0 + 2.0 * (2.0 * 0.5);

        update_mixture_proportions(&data, &mut state, &[1.0, 1.0], 0, &schedule);
        let step = 2f64.powf(-0.5);
        let hemi = 5.0 + step * (hemi_target - 5.0);
        let homo = 5.0 + step * (homo_target - 5.0);
        for k in 0..2 {
            approx::assert_abs_diff_eq!(state.theta[(0, 0, k)], hemi, epsilon = 1e-12);
            approx::assert_abs_diff_eq!(state.theta[(0, 1, k)], homo, epsilon = 1e-12);
        }
        assert_eq!(state.sample_iter[(0, 1)], 1);

        update_mixture_proportions(&data, &mut state, &[1.0, 1.0], 0, &schedule);
        let step = 3f64.powf(-0.5);
        approx::assert_abs_diff_eq!(
            state.theta[(0, 1, 0)],
            homo + step * (homo_target - homo),
            epsilon = 1e-12
        );
    }

    #[test]
    fn theta_never_drops_below_one() {
        let (data, mut state) = setup();
        state.theta.fill(50.0);
        state.phi.fill(1e-4);
        state.zeta.fill(1e-4);
        let schedule = StepSchedule::Power { power: -0.1 };
        for _ in 0..20 {
            update_mixture_proportions(&data, &mut state, &[0.01, 0.01], 1, &schedule);
        }
        assert!(state.theta.iter().all(|&x| x >= 1.0));
        assert_eq!(state.sample_iter[(0, 2)], 20);
    }
}
