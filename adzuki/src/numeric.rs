use special::Gamma as SpecialGamma;

/// Smallest responsibility left after normalization
pub const RESPONSIBILITY_FLOOR: f64 = 1e-4;

/// Frequencies are pulled this far inside (0, 1) before taking logs
pub const FREQ_EPS: f64 = 1e-6;

/// Clip an allele frequency mean into the open unit interval
#[inline]
pub fn clip_freq(m: f64) -> f64 {
    m.clamp(FREQ_EPS, 1.0 - FREQ_EPS)
}

#[inline]
pub fn digamma(x: f64) -> f64 {
    SpecialGamma::digamma(x)
}

#[inline]
pub fn ln_gamma(x: f64) -> f64 {
    SpecialGamma::ln_gamma(x).0
}

/// Turn log-scale scores into probabilities in place.
///
/// Subtracts the maximum before exponentiating; entries that underflow
/// to exactly zero are floored at [`RESPONSIBILITY_FLOOR`].
pub fn normalize_log_weights(scores: &mut [f64]) {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let log_norm = max + scores.iter().map(|&s| (s - max).exp()).sum::<f64>().ln();
    for s in scores.iter_mut() {
        *s = (*s - log_norm).exp();
        if *s == 0.0 {
            *s = RESPONSIBILITY_FLOOR;
        }
    }
}
