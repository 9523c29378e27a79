//! Tab-separated result files.
//!
//! - `{out}_freqs`: for each time step a line holding the step index,
//!   then `L` lines of `K` frequency means
//! - `{out}_theta`: one line of `K` normalized proportions per individual
//! - checkpoint: one line of `K` raw pseudo-counts per individual
//!
//! All floats are written with [`DECIMALS`] digits after the point.

use crate::common_io::{mkdir_parent, read_tab_separated, write_lines};
use crate::genotype::GenotypeData;
use anyhow::bail;
use ndarray::prelude::*;

pub const DECIMALS: usize = 6;

fn tab_line<'a, I>(values: I) -> Box<str>
where
    I: IntoIterator<Item = &'a f64>,
{
    values
        .into_iter()
        .map(|x| format!("{:.*}", DECIMALS, x))
        .collect::<Vec<_>>()
        .join("\t")
        .into_boxed_str()
}

/// Write a `T x K x L` array of frequency means
pub fn write_frequencies(freq_mean: &Array3<f64>, file: &str) -> anyhow::Result<()> {
    let (nt, _, nl) = freq_mean.dim();
    let mut lines: Vec<Box<str>> = Vec::with_capacity(nt * (nl + 1));
    for t in 0..nt {
        lines.push(t.to_string().into_boxed_str());
        for l in 0..nl {
            lines.push(tab_line(freq_mean.slice(s![t, .., l])));
        }
    }
    mkdir_parent(file)?;
    write_lines(&lines, file)
}

/// Read back a file written by [`write_frequencies`] as `T x K x L`
pub fn read_frequencies(file: &str) -> anyhow::Result<Array3<f64>> {
    let lines = read_tab_separated(file)?;

    let mut blocks: Vec<Vec<Vec<f64>>> = vec![];
    for words in lines.iter() {
        let header = match words.as_slice() {
            [w] => w.parse::<usize>().ok(),
            _ => None,
        };
        if let Some(t) = header {
            if t != blocks.len() {
                bail!("{}: expected time step {}, found {}", file, blocks.len(), t);
            }
            blocks.push(vec![]);
            continue;
        }
        let Some(block) = blocks.last_mut() else {
            bail!("{}: frequencies before the first time step line", file);
        };
        block.push(parse_row(words)?);
    }

    let nt = blocks.len();
    if nt == 0 {
        bail!("{}: no time steps", file);
    }
    let nl = blocks[0].len();
    let kk = blocks[0].first().map(|row| row.len()).unwrap_or(0);

    let mut ret = Array3::zeros((nt, kk, nl));
    for (t, block) in blocks.iter().enumerate() {
        if block.len() != nl {
            bail!("{}: time step {} has {} loci, expected {}", file, t, block.len(), nl);
        }
        for (l, row) in block.iter().enumerate() {
            if row.len() != kk {
                bail!("{}: ragged row at time step {}, locus {}", file, t, l);
            }
            ret.slice_mut(s![t, .., l]).assign(&ArrayView1::from(&row[..]));
        }
    }
    Ok(ret)
}

fn parse_row(words: &[Box<str>]) -> anyhow::Result<Vec<f64>> {
    words
        .iter()
        .map(|w| {
            w.parse::<f64>()
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", w, e))
        })
        .collect()
}

/// Write a matrix, one row per line
pub fn write_matrix(mat: &Array2<f64>, file: &str) -> anyhow::Result<()> {
    let lines: Vec<Box<str>> = mat.rows().into_iter().map(|row| tab_line(row)).collect();
    mkdir_parent(file)?;
    write_lines(&lines, file)
}

/// Read a rectangular tab-separated matrix of floats
pub fn read_matrix(file: &str) -> anyhow::Result<Array2<f64>> {
    let lines = read_tab_separated(file)?;
    let nrows = lines.len();
    let ncols = lines.first().map(|w| w.len()).unwrap_or(0);
    let mut values = Vec::with_capacity(nrows * ncols);
    for (i, words) in lines.iter().enumerate() {
        if words.len() != ncols {
            bail!("{}: line {} has {} columns, expected {}", file, i, words.len(), ncols);
        }
        values.extend(parse_row(words)?);
    }
    Ok(Array2::from_shape_vec((nrows, ncols), values)?)
}

/// Individuals in `(t, d)` order
pub fn default_sample_order<G: GenotypeData + ?Sized>(data: &G) -> Vec<(usize, usize)> {
    (0..data.num_time_steps())
        .flat_map(|t| (0..data.num_individuals(t)).map(move |d| (t, d)))
        .collect()
}

/// Check that `order` lists every individual of `data` exactly once
pub fn check_sample_order<G: GenotypeData + ?Sized>(
    data: &G,
    order: &[(usize, usize)],
) -> anyhow::Result<()> {
    if order.len() != data.total_individuals() {
        bail!(
            "sample order has {} entries for {} individuals",
            order.len(),
            data.total_individuals()
        );
    }
    let mut seen = Array2::from_elem((data.num_time_steps(), data.max_individuals()), false);
    for &(t, d) in order {
        if t >= data.num_time_steps() || d >= data.num_individuals(t) {
            bail!("sample ({}, {}) is not in the data", t, d);
        }
        if seen[(t, d)] {
            bail!("sample ({}, {}) appears twice in the order", t, d);
        }
        seen[(t, d)] = true;
    }
    Ok(())
}

/// Read a sample order, one `time_step<TAB>individual` pair per line
pub fn read_sample_order(file: &str) -> anyhow::Result<Vec<(usize, usize)>> {
    read_tab_separated(file)?
        .into_iter()
        .enumerate()
        .map(|(i, words)| -> anyhow::Result<(usize, usize)> {
            if words.len() != 2 {
                bail!("line {} of {}: expected 2 fields, found {}", i + 1, file, words.len());
            }
            Ok((words[0].parse()?, words[1].parse()?))
        })
        .collect()
}

fn gather_rows<G, F>(
    data: &G,
    theta: &Array3<f64>,
    order: Option<&[(usize, usize)]>,
    row_fn: F,
) -> anyhow::Result<Array2<f64>>
where
    G: GenotypeData + ?Sized,
    F: Fn(ArrayView1<f64>) -> Array1<f64>,
{
    let default_order;
    let order = match order {
        Some(order) => order,
        None => {
            default_order = default_sample_order(data);
            &default_order[..]
        }
    };

    let kk = theta.dim().2;
    let mut ret = Array2::zeros((order.len(), kk));
    for (i, &(t, d)) in order.iter().enumerate() {
        if t >= data.num_time_steps() || d >= data.num_individuals(t) {
            bail!("sample ({}, {}) is not in the data", t, d);
        }
        ret.row_mut(i).assign(&row_fn(theta.slice(s![t, d, ..])));
    }
    Ok(ret)
}

/// Normalized admixture proportions, one row per individual, in `order`
/// or `(t, d)` order
pub fn proportion_rows<G: GenotypeData + ?Sized>(
    data: &G,
    theta: &Array3<f64>,
    order: Option<&[(usize, usize)]>,
) -> anyhow::Result<Array2<f64>> {
    gather_rows(data, theta, order, |x| {
        let total = x.sum();
        x.mapv(|v| v / total)
    })
}

pub fn write_proportions<G: GenotypeData + ?Sized>(
    data: &G,
    theta: &Array3<f64>,
    order: Option<&[(usize, usize)]>,
    file: &str,
) -> anyhow::Result<()> {
    write_matrix(&proportion_rows(data, theta, order)?, file)
}

pub fn read_proportions(file: &str) -> anyhow::Result<Array2<f64>> {
    read_matrix(file)
}

/// Raw pseudo-counts, one row per individual in `order`, or in `(t, d)`
/// order without one
pub fn write_checkpoint<G: GenotypeData + ?Sized>(
    data: &G,
    theta: &Array3<f64>,
    order: Option<&[(usize, usize)]>,
    file: &str,
) -> anyhow::Result<()> {
    write_matrix(&gather_rows(data, theta, order, |x| x.to_owned())?, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotype::GenotypeTensor;

    fn toy() -> GenotypeTensor {
        GenotypeTensor::new(
            vec![Array2::zeros((2, 3)), Array2::zeros((1, 3))],
            vec![0.0, 4.0],
        )
        .unwrap()
    }

    #[test]
    fn frequencies_survive_a_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("out_freqs");
        let file = file.to_str().unwrap();

        let freqs = Array3::from_shape_fn((2, 1, 3), |(t, k, l)| {
            0.1 + 0.2 * t as f64 + 0.05 * k as f64 + 0.123456789 * l as f64
        });
        write_frequencies(&freqs, file)?;
        let back = read_frequencies(file)?;

        assert_eq!(back.dim(), freqs.dim());
        approx::assert_abs_diff_eq!(back, freqs, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn proportions_follow_the_requested_order() -> anyhow::Result<()> {
        let data = toy();
        let mut theta = Array3::ones((2, 2, 2));
        theta[(0, 1, 0)] = 3.0;
        theta[(1, 0, 1)] = 4.0;

        let dir = tempfile::tempdir()?;
        let file = dir.path().join("sub/out_theta.gz");
        let file = file.to_str().unwrap();

        let order = [(1, 0), (0, 1), (0, 0)];
        write_proportions(&data, &theta, Some(&order[..]), file)?;
        let back = read_proportions(file)?;

        let expected = array![[0.2, 0.8], [0.75, 0.25], [0.5, 0.5]];
        approx::assert_abs_diff_eq!(back, expected, epsilon = 1e-6);

        let dflt = proportion_rows(&data, &theta, None)?;
        assert_eq!(dflt.nrows(), 3);
        approx::assert_abs_diff_eq!(dflt[(1, 0)], 0.75);

        assert!(proportion_rows(&data, &theta, Some(&[(1, 1)][..])).is_err());
        Ok(())
    }

    #[test]
    fn checkpoint_keeps_raw_counts() -> anyhow::Result<()> {
        let data = toy();
        let theta = Array3::from_elem((2, 2, 2), 2.5);
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("temp_theta");
        let file = file.to_str().unwrap();

        write_checkpoint(&data, &theta, None, file)?;
        let back = read_matrix(file)?;
        assert_eq!(back.dim(), (3, 2));
        assert!(back.iter().all(|&x| x == 2.5));
        Ok(())
    }

    #[test]
    fn sample_order_must_be_a_permutation() -> anyhow::Result<()> {
        let data = toy();
        check_sample_order(&data, &[(1, 0), (0, 1), (0, 0)])?;
        assert!(check_sample_order(&data, &[(1, 0), (0, 1)]).is_err());
        assert!(check_sample_order(&data, &[(1, 0), (0, 1), (0, 1)]).is_err());
        assert!(check_sample_order(&data, &[(1, 1), (0, 1), (0, 0)]).is_err());
        Ok(())
    }

    #[test]
    fn sample_order_file_is_read_line_by_line() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("order.tsv");
        let file = file.to_str().unwrap();
        write_lines(&["1\t0", "0\t1", "0\t0"], file)?;
        assert_eq!(read_sample_order(file)?, vec![(1, 0), (0, 1), (0, 0)]);

        write_lines(&["1\t0\t3"], file)?;
        assert!(read_sample_order(file).is_err());
        Ok(())
    }
}
