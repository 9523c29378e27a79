//! Batch and stochastic inference regimes.
//!
//! Both regimes share one inference loop ([`crate::engine::Engine`]);
//! they differ only in the knobs exposed here.

use crate::mixture::StepSchedule;
use crate::options::InferenceOptions;
use crate::responsibility::ResponsibilityRule;
use crate::state::InitScheme;

/// When the outer sweep over sampled loci ends
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopRule {
    /// Check the mean absolute theta change every `check_every`
    /// iterations (and after the first); stop once it drops below `tol`
    /// after at least one pass worth of loci
    ThetaDelta { tol: f64, check_every: usize },
    /// Run exactly `num_epochs` passes worth of loci
    Epochs { num_epochs: usize },
}

pub trait InferenceRegime: Sync {
    fn name(&self) -> &'static str;

    fn step_schedule(&self, options: &InferenceOptions) -> StepSchedule;

    fn responsibility_rule(&self) -> ResponsibilityRule;

    fn init_scheme(&self) -> InitScheme;

    fn stop_rule(&self, options: &InferenceOptions) -> StopRule;

    /// Number of short restarts tried before the main run, if any
    fn multi_start(&self, options: &InferenceOptions) -> Option<usize>;

    /// Evaluate the ELBO after the main run
    fn reports_elbo(&self) -> bool;

    /// Score held-out data even when nothing is held out
    fn always_reports_hold_out(&self) -> bool;
}

/// Coordinate ascent with a two-phase step size and a theta-change stop
/// rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cavi;

impl InferenceRegime for Cavi {
    fn name(&self) -> &'static str {
        "cavi"
    }

    fn step_schedule(&self, _options: &InferenceOptions) -> StepSchedule {
        StepSchedule::two_phase()
    }

    fn responsibility_rule(&self) -> ResponsibilityRule {
        ResponsibilityRule {
            tol: 0.01,
            excluded_weight: 1e-4,
        }
    }

    fn init_scheme(&self) -> InitScheme {
        InitScheme::Batch
    }

    fn stop_rule(&self, options: &InferenceOptions) -> StopRule {
        StopRule::ThetaDelta {
            tol: options.theta_tol,
            check_every: options.check_every,
        }
    }

    fn multi_start(&self, _options: &InferenceOptions) -> Option<usize> {
        None
    }

    fn reports_elbo(&self) -> bool {
        false
    }

    fn always_reports_hold_out(&self) -> bool {
        true
    }
}

/// Stochastic variational inference over a fixed epoch budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct Svi;

impl InferenceRegime for Svi {
    fn name(&self) -> &'static str {
        "svi"
    }

    fn step_schedule(&self, options: &InferenceOptions) -> StepSchedule {
        StepSchedule::Power {
            power: options.step_power,
        }
    }

    fn responsibility_rule(&self) -> ResponsibilityRule {
        ResponsibilityRule {
            tol: 0.001,
            excluded_weight: 1e-8,
        }
    }

    fn init_scheme(&self) -> InitScheme {
        InitScheme::Stochastic
    }

    fn stop_rule(&self, options: &InferenceOptions) -> StopRule {
        StopRule::Epochs {
            num_epochs: options.num_epochs,
        }
    }

    fn multi_start(&self, options: &InferenceOptions) -> Option<usize> {
        options.multi_init.then_some(options.num_starts)
    }

    fn reports_elbo(&self) -> bool {
        true
    }

    fn always_reports_hold_out(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regimes_pick_their_own_knobs() {
        let options = InferenceOptions {
            multi_init: true,
            num_epochs: 7,
            ..Default::default()
        };

        assert_eq!(Cavi.multi_start(&options), None);
        assert_eq!(Svi.multi_start(&options), Some(5));
        assert_eq!(Svi.stop_rule(&options), StopRule::Epochs { num_epochs: 7 });
        assert_eq!(
            Cavi.stop_rule(&options),
            StopRule::ThetaDelta {
                tol: 1.0,
                check_every: 1000
            }
        );
        assert!(Svi.responsibility_rule().tol < Cavi.responsibility_rule().tol);
        assert_eq!(Cavi.step_schedule(&options), StepSchedule::two_phase());
    }
}
