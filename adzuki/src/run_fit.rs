use adzuki::engine::{Engine, InferenceReport};
use adzuki::genotype::GenotypeData;
use adzuki::options::InferenceOptions;
use adzuki::output::{default_sample_order, read_sample_order, write_frequencies, write_matrix};
use adzuki::regime::{Cavi, InferenceRegime, Svi};
use adzuki::simulate::{simulate_admixture, AdmixtureSimParams, SimulatedAdmixture};

use anyhow::Result;
use clap::Args;
use log::info;
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::ThreadPoolBuilder;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct FitArgs {
    #[arg(short, long, help = "Output prefix ({out}_freqs, {out}_theta, ...)")]
    pub out: String,

    #[arg(short = 'k', long, default_value = "2", help = "Number of populations")]
    pub num_pops: usize,

    #[arg(long, default_value = "200", help = "Number of simulated loci")]
    pub num_loci: usize,

    #[arg(
        long,
        value_delimiter = ',',
        default_value = "20,20,20,20",
        help = "Individuals sampled at each time step"
    )]
    pub individuals: Vec<usize>,

    #[arg(
        long,
        value_delimiter = ',',
        default_value = "0,20,40,60",
        help = "Generation of each time step"
    )]
    pub generations: Vec<usize>,

    #[arg(long, default_value = "5000", help = "Effective population size")]
    pub pop_size: usize,

    #[arg(
        long,
        default_value = "0.5",
        help = "Dirichlet concentration of simulated admixture proportions"
    )]
    pub dirichlet_alpha: f64,

    #[arg(
        long,
        default_value = "0",
        help = "Fraction of individuals simulated as hemizygous"
    )]
    pub hemizygous_fraction: f64,

    #[arg(
        long,
        default_value = "0",
        help = "Fraction of genotype calls held out for scoring"
    )]
    pub hold_out_fraction: f64,

    #[arg(
        long,
        default_value = "0",
        help = "Fraction of individuals labelled with their major source population"
    )]
    pub label_fraction: f64,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Dirichlet prior of admixture proportions (default: 1 for every population)"
    )]
    pub mixture_prior: Vec<f64>,

    #[arg(
        long,
        default_value = "1000",
        help = "Cap on inner alternations at one locus"
    )]
    pub max_inner_iter: usize,

    #[arg(long, help = "Write raw pseudo-counts here at every check")]
    pub checkpoint: Option<String>,

    #[arg(
        long,
        help = "Row order of written proportions and checkpoints",
        long_help = "Row order of written proportions and checkpoints.\n\
		     One `time_step<TAB>individual` pair per line, listing every individual once.\n\
		     Without it rows follow time step, then individual."
    )]
    pub sample_order: Option<String>,

    #[arg(long, default_value = "16", help = "Maximum number of threads")]
    pub max_threads: usize,

    #[arg(long, default_value_t = false, help = "Show progress bar")]
    pub show_progress: bool,

    #[arg(long, default_value = "42", help = "Random seed")]
    pub seed: u64,
}

#[derive(Args, Debug, Clone)]
pub struct CaviArgs {
    #[command(flatten)]
    pub fit: FitArgs,

    #[arg(
        long,
        default_value = "1.0",
        help = "Stop once the mean absolute theta change drops below this"
    )]
    pub theta_tol: f64,

    #[arg(
        long,
        default_value = "1000",
        help = "Iterations between theta checks"
    )]
    pub check_every: usize,
}

#[derive(Args, Debug, Clone)]
pub struct SviArgs {
    #[command(flatten)]
    pub fit: FitArgs,

    #[arg(long, default_value = "50", help = "Number of passes over the loci")]
    pub epochs: usize,

    #[arg(
        long,
        default_value_t = false,
        help = "Keep the best of several short restarts"
    )]
    pub multi_init: bool,

    #[arg(long, default_value = "-0.5", allow_hyphen_values = true, help = "Step size exponent")]
    pub step_power: f64,
}

pub fn run_cavi(args: &CaviArgs) -> Result<()> {
    let (sim, mut options) = prepare(&args.fit)?;
    options.theta_tol = args.theta_tol;
    options.check_every = args.check_every;
    fit_and_write(&args.fit, &sim, options, Cavi)
}

pub fn run_svi(args: &SviArgs) -> Result<()> {
    let (sim, mut options) = prepare(&args.fit)?;
    options.num_epochs = args.epochs;
    options.multi_init = args.multi_init;
    options.step_power = args.step_power;
    fit_and_write(&args.fit, &sim, options, Svi)
}

fn prepare(args: &FitArgs) -> Result<(SimulatedAdmixture, InferenceOptions)> {
    let max_threads = num_cpus::get().min(args.max_threads);
    ThreadPoolBuilder::new()
        .num_threads(max_threads)
        .build_global()?;
    info!("will use {} threads", rayon::current_num_threads());

    let params = AdmixtureSimParams {
        num_pops: args.num_pops,
        num_loci: args.num_loci,
        individuals_per_step: args.individuals.clone(),
        generations: args.generations.clone(),
        pop_size: args.pop_size,
        dirichlet_alpha: args.dirichlet_alpha,
        hemizygous_fraction: args.hemizygous_fraction,
        seed: args.seed,
        ..Default::default()
    };

    let mut sim = simulate_admixture(&params)?;
    info!(
        "simulated {} individuals over {} time steps at {} loci",
        sim.data.total_individuals(),
        sim.data.num_time_steps(),
        sim.data.num_loci()
    );

    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(1));
    if args.hold_out_fraction > 0.0 {
        let n = sim.data.mask_hold_out(args.hold_out_fraction, &mut rng)?;
        info!("held out {} genotype calls", n);
    }

    let labels = if args.label_fraction > 0.0 {
        Some(major_population_labels(&sim, args.label_fraction, &mut rng))
    } else {
        None
    };

    let options = InferenceOptions {
        num_pops: args.num_pops,
        mixture_prior: args.mixture_prior.clone(),
        pop_size: args.pop_size as f64,
        use_labels: labels.is_some(),
        labels,
        max_inner_iter: args.max_inner_iter,
        seed: args.seed,
        checkpoint: args.checkpoint.as_ref().map(PathBuf::from),
        sample_order: args
            .sample_order
            .as_deref()
            .map(read_sample_order)
            .transpose()?,
        show_progress: args.show_progress,
        ..Default::default()
    };

    Ok((sim, options))
}

/// Label a random subset of individuals with the population contributing
/// most of their ancestry; -1 elsewhere
fn major_population_labels(sim: &SimulatedAdmixture, fraction: f64, rng: &mut StdRng) -> Array2<i32> {
    let data = &sim.data;
    let mut labels = Array2::from_elem((data.num_time_steps(), data.max_individuals()), -1);
    let mut i = 0;
    for t in 0..data.num_time_steps() {
        for d in 0..data.num_individuals(t) {
            if rng.random_bool(fraction.clamp(0.0, 1.0)) {
                let row = sim.proportions.row(i);
                let (k, _) = row
                    .iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (k, &p)| {
                        if p > best.1 {
                            (k, p)
                        } else {
                            best
                        }
                    });
                labels[(t, d)] = k as i32;
            }
            i += 1;
        }
    }
    labels
}

fn fit_and_write<R: InferenceRegime>(
    args: &FitArgs,
    sim: &SimulatedAdmixture,
    options: InferenceOptions,
    regime: R,
) -> Result<()> {
    let mut engine = Engine::new(&sim.data, options, regime)?;
    let report: InferenceReport = engine.run()?;

    info!(
        "done after {} iterations (converged: {})",
        report.iterations, report.converged
    );
    if let Some(elbo) = report.elbo {
        info!("objective: {:.10}", elbo);
    }
    if let Some(llik) = report.hold_out_log_likelihood {
        info!("hold out log likelihood: {:.10}", llik);
    }

    engine.write_results(&args.out)?;
    write_frequencies(&sim.freqs, &format!("{}_true_freqs", args.out))?;

    let true_theta = match engine.options().sample_order.as_deref() {
        Some(order) => {
            let offsets = default_sample_order(&sim.data)
                .iter()
                .enumerate()
                .map(|(i, &td)| (td, i))
                .collect::<HashMap<_, _>>();
            let rows: Vec<usize> = order.iter().map(|td| offsets[td]).collect();
            sim.proportions.select(Axis(0), &rows)
        }
        None => sim.proportions.clone(),
    };
    write_matrix(&true_theta, &format!("{}_true_theta", args.out))?;
    info!("wrote results to {}_*", args.out);
    Ok(())
}
