use adzuki::genotype::GenotypeData;
use adzuki::options::InferenceOptions;
use adzuki::output::{
    default_sample_order, read_frequencies, read_matrix, read_proportions, write_frequencies,
};
use adzuki::simulate::{simulate_admixture, AdmixtureSimParams};
use adzuki::{Cavi, Engine};
use anyhow::Result;

#[test]
fn fitted_results_read_back_to_written_precision() -> Result<()> {
    let sim = simulate_admixture(&AdmixtureSimParams {
        num_loci: 12,
        individuals_per_step: vec![6, 4],
        generations: vec![0, 8],
        ..Default::default()
    })?;

    let dir = tempfile::tempdir()?;
    let out = dir.path().join("fit");
    let out = out.to_str().unwrap();
    let checkpoint = dir.path().join("temp_theta");

    let mut order = default_sample_order(&sim.data);
    order.reverse();
    order.swap(0, 4);

    let options = InferenceOptions {
        theta_tol: f64::INFINITY,
        check_every: 4,
        checkpoint: Some(checkpoint.clone()),
        sample_order: Some(order.clone()),
        ..Default::default()
    };
    let mut engine = Engine::new(&sim.data, options, Cavi)?;
    engine.run()?;
    engine.write_results(out)?;

    let freqs = read_frequencies(&format!("{}_freqs", out))?;
    approx::assert_abs_diff_eq!(&freqs, engine.frequencies(), epsilon = 1e-6);

    let theta = read_proportions(&format!("{}_theta", out))?;
    assert_eq!(theta.dim(), (10, 2));
    for (i, &(t, d)) in order.iter().enumerate() {
        approx::assert_abs_diff_eq!(theta.row(i), engine.proportions(t, d).view(), epsilon = 1e-6);
    }

    let raw = read_matrix(checkpoint.to_str().unwrap())?;
    assert_eq!(raw.nrows(), sim.data.total_individuals());
    assert!(raw.iter().all(|&x| x >= 1.0 - 1e-6));
    for (i, &(t, d)) in order.iter().enumerate() {
        let counts = engine.state().theta.slice(ndarray::s![t, d, ..]).to_owned();
        approx::assert_abs_diff_eq!(raw.row(i), counts.view(), epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn incomplete_sample_order_is_rejected() -> Result<()> {
    let sim = simulate_admixture(&AdmixtureSimParams {
        num_loci: 5,
        individuals_per_step: vec![3, 2],
        generations: vec![0, 4],
        ..Default::default()
    })?;
    let options = InferenceOptions {
        sample_order: Some(vec![(1, 1), (0, 0)]),
        ..Default::default()
    };
    assert!(Engine::new(&sim.data, options, Cavi).is_err());
    Ok(())
}

#[test]
fn true_frequencies_round_trip_through_gzip() -> Result<()> {
    let sim = simulate_admixture(&AdmixtureSimParams::default())?;
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("sim_true_freqs.gz");
    let file = file.to_str().unwrap();

    write_frequencies(&sim.freqs, file)?;
    let back = read_frequencies(file)?;
    assert_eq!(back.dim(), sim.freqs.dim());
    approx::assert_abs_diff_eq!(back, sim.freqs, epsilon = 1e-6);
    Ok(())
}
