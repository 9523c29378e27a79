//! Genotype data accessor.
//!
//! The inference engine only sees genotypes through [`GenotypeData`], so
//! any storage (dense tensor, memory-mapped file, ...) can back it.
//! [`GenotypeTensor`] is the in-memory implementation used by the binary
//! and the tests.

use anyhow::bail;
use ndarray::prelude::*;
use rand::Rng;

/// Read-only view of genotype data sampled at several time steps.
///
/// Entries are addressed by `(t, d, l)`: time step, individual within
/// that time step, locus.
pub trait GenotypeData: Sync {
    /// Number of sampling time steps `T`
    fn num_time_steps(&self) -> usize;

    /// Number of individuals `D_t` sampled at time step `t`
    fn num_individuals(&self, t: usize) -> usize;

    /// Number of loci `L`
    fn num_loci(&self) -> usize;

    /// Non-reference allele count in {0, 1, 2}
    fn genotype(&self, t: usize, d: usize, l: usize) -> u8;

    /// Not visible to inference (missing or held out)
    fn hidden(&self, t: usize, d: usize, l: usize) -> bool;

    /// Held out for predictive scoring
    fn hold_out(&self, t: usize, d: usize, l: usize) -> bool;

    /// No genotype call available
    fn missing(&self, t: usize, d: usize, l: usize) -> bool;

    /// Single-copy individual (dosage coded as 0 or 2)
    fn hemizygous(&self, t: usize, d: usize) -> bool;

    /// Generation time of sampling step `t`
    fn generation(&self, t: usize) -> f64;

    /// Whether any entry is held out
    fn has_hold_out(&self) -> bool;

    /// Largest `D_t` over all time steps
    fn max_individuals(&self) -> usize {
        (0..self.num_time_steps())
            .map(|t| self.num_individuals(t))
            .max()
            .unwrap_or(0)
    }

    /// Total number of individuals over all time steps
    fn total_individuals(&self) -> usize {
        (0..self.num_time_steps())
            .map(|t| self.num_individuals(t))
            .sum()
    }
}

/// Dense in-memory genotype tensor, one `D_t x L` matrix per time step.
#[derive(Debug, Clone)]
pub struct GenotypeTensor {
    genotypes: Vec<Array2<u8>>,
    missing: Vec<Array2<bool>>,
    held_out: Vec<Array2<bool>>,
    hemizygous: Vec<Vec<bool>>,
    generations: Vec<f64>,
    num_loci: usize,
    num_held_out: usize,
}

impl GenotypeTensor {
    /// Build a tensor from per-time-step genotype matrices.
    ///
    /// * `genotypes` - one `D_t x L` matrix of dosages per time step
    /// * `generations` - generation time of each step, strictly increasing
    pub fn new(genotypes: Vec<Array2<u8>>, generations: Vec<f64>) -> anyhow::Result<Self> {
        if genotypes.is_empty() {
            bail!("need at least one time step");
        }

        if genotypes.len() != generations.len() {
            bail!(
                "{} genotype matrices but {} generation times",
                genotypes.len(),
                generations.len()
            );
        }

        let num_loci = genotypes[0].ncols();
        if num_loci == 0 {
            bail!("need at least one locus");
        }

        for (t, x) in genotypes.iter().enumerate() {
            if x.ncols() != num_loci {
                bail!(
                    "time step {} has {} loci, expected {}",
                    t,
                    x.ncols(),
                    num_loci
                );
            }
            if let Some(&bad) = x.iter().find(|&&g| g > 2) {
                bail!("time step {} has genotype value {} > 2", t, bad);
            }
        }

        if genotypes.iter().all(|x| x.nrows() == 0) {
            bail!("no individuals at any time step");
        }

        for t in 1..generations.len() {
            if generations[t] <= generations[t - 1] {
                bail!(
                    "generation times must increase: step {} ({}) after step {} ({})",
                    t,
                    generations[t],
                    t - 1,
                    generations[t - 1]
                );
            }
        }

        let missing = genotypes
            .iter()
            .map(|x| Array2::from_elem(x.raw_dim(), false))
            .collect();
        let held_out = genotypes
            .iter()
            .map(|x| Array2::from_elem(x.raw_dim(), false))
            .collect();
        let hemizygous = genotypes.iter().map(|x| vec![false; x.nrows()]).collect();

        Ok(Self {
            genotypes,
            missing,
            held_out,
            hemizygous,
            generations,
            num_loci,
            num_held_out: 0,
        })
    }

    /// Mark individual `d` at time `t` as hemizygous
    pub fn set_hemizygous(&mut self, t: usize, d: usize, hemizygous: bool) {
        self.hemizygous[t][d] = hemizygous;
    }

    /// Mark a genotype call as missing
    pub fn set_missing(&mut self, t: usize, d: usize, l: usize) {
        self.missing[t][(d, l)] = true;
    }

    /// Hold out a genotype call from inference
    pub fn set_hold_out(&mut self, t: usize, d: usize, l: usize) {
        if !self.held_out[t][(d, l)] {
            self.held_out[t][(d, l)] = true;
            self.num_held_out += 1;
        }
    }

    /// Hold out each observed entry independently with probability
    /// `fraction`. Returns the number of newly held-out entries.
    pub fn mask_hold_out<R: Rng>(&mut self, fraction: f64, rng: &mut R) -> anyhow::Result<usize> {
        if !(0.0..=1.0).contains(&fraction) {
            bail!("hold-out fraction {} is not in [0, 1]", fraction);
        }

        let before = self.num_held_out;
        for t in 0..self.genotypes.len() {
            for d in 0..self.genotypes[t].nrows() {
                for l in 0..self.num_loci {
                    if !self.missing[t][(d, l)] && rng.random_bool(fraction) {
                        self.set_hold_out(t, d, l);
                    }
                }
            }
        }
        Ok(self.num_held_out - before)
    }

    /// Number of held-out entries
    pub fn num_held_out(&self) -> usize {
        self.num_held_out
    }
}

impl GenotypeData for GenotypeTensor {
    fn num_time_steps(&self) -> usize {
        self.genotypes.len()
    }

    fn num_individuals(&self, t: usize) -> usize {
        self.genotypes[t].nrows()
    }

    fn num_loci(&self) -> usize {
        self.num_loci
    }

    fn genotype(&self, t: usize, d: usize, l: usize) -> u8 {
        self.genotypes[t][(d, l)]
    }

    fn hidden(&self, t: usize, d: usize, l: usize) -> bool {
        self.missing[t][(d, l)] || self.held_out[t][(d, l)]
    }

    fn hold_out(&self, t: usize, d: usize, l: usize) -> bool {
        self.held_out[t][(d, l)]
    }

    fn missing(&self, t: usize, d: usize, l: usize) -> bool {
        self.missing[t][(d, l)]
    }

    fn hemizygous(&self, t: usize, d: usize) -> bool {
        self.hemizygous[t][d]
    }

    fn generation(&self, t: usize) -> f64 {
        self.generations[t]
    }

    fn has_hold_out(&self) -> bool {
        self.num_held_out > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn toy() -> GenotypeTensor {
        GenotypeTensor::new(
            vec![array![[0, 1, 2], [2, 2, 0]], array![[1, 1, 1]]],
            vec![0.0, 10.0],
        )
        .unwrap()
    }

    #[test]
    fn shapes_are_reported_per_time_step() {
        let data = toy();
        assert_eq!(data.num_time_steps(), 2);
        assert_eq!(data.num_individuals(0), 2);
        assert_eq!(data.num_individuals(1), 1);
        assert_eq!(data.max_individuals(), 2);
        assert_eq!(data.total_individuals(), 3);
        assert_eq!(data.num_loci(), 3);
        assert_eq!(data.genotype(0, 1, 0), 2);
    }

    #[test]
    fn hidden_covers_missing_and_held_out() {
        let mut data = toy();
        data.set_missing(0, 0, 1);
        data.set_hold_out(1, 0, 2);

        assert!(data.hidden(0, 0, 1));
        assert!(!data.hold_out(0, 0, 1));
        assert!(data.hidden(1, 0, 2));
        assert!(data.hold_out(1, 0, 2));
        assert!(!data.hidden(0, 0, 0));
        assert!(data.has_hold_out());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(GenotypeTensor::new(vec![], vec![]).is_err());
        assert!(GenotypeTensor::new(vec![array![[3u8]]], vec![0.0]).is_err());
        assert!(GenotypeTensor::new(
            vec![array![[0u8, 1]], array![[0u8]]],
            vec![0.0, 1.0]
        )
        .is_err());
        assert!(GenotypeTensor::new(
            vec![array![[0u8]], array![[0u8]]],
            vec![5.0, 5.0]
        )
        .is_err());
        assert!(GenotypeTensor::new(vec![Array2::<u8>::zeros((0, 4))], vec![0.0]).is_err());
    }

    #[test]
    fn hold_out_mask_skips_missing_entries() -> anyhow::Result<()> {
        let mut data = toy();
        data.set_missing(0, 0, 0);
        let mut rng = StdRng::seed_from_u64(7);
        let n = data.mask_hold_out(1.0, &mut rng)?;
        assert_eq!(n, 8);
        assert!(!data.hold_out(0, 0, 0));
        assert!(data.mask_hold_out(1.5, &mut rng).is_err());
        Ok(())
    }
}
