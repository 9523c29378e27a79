use anyhow::bail;
use ndarray::prelude::*;

/// Supervised population assignment of one individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Label {
    #[default]
    Unlabeled,
    Assigned(usize),
}

/// How a label constrains one population's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Free,
    Excluded,
    Assigned,
}

impl Label {
    /// Decode the `-1 = unlabeled` convention
    pub fn from_code(code: i32, num_pops: usize) -> anyhow::Result<Self> {
        match code {
            -1 => Ok(Label::Unlabeled),
            k if k >= 0 && (k as usize) < num_pops => Ok(Label::Assigned(k as usize)),
            _ => bail!(
                "label {} is out of range for {} populations (use -1 for unlabeled)",
                code,
                num_pops
            ),
        }
    }

    pub fn membership(&self, k: usize) -> Membership {
        match *self {
            Label::Unlabeled => Membership::Free,
            Label::Assigned(j) if j == k => Membership::Assigned,
            Label::Assigned(_) => Membership::Excluded,
        }
    }
}

/// Build the `T x D_max` label table.
///
/// * `codes` - optional `T x D_max` table of `-1, 0, ..., K-1`
/// * `use_labels` - when false every individual is unlabeled
pub fn label_table(
    codes: Option<&Array2<i32>>,
    use_labels: bool,
    dims: (usize, usize),
    num_pops: usize,
) -> anyhow::Result<Array2<Label>> {
    let mut labels = Array2::from_elem(dims, Label::Unlabeled);

    let codes = match codes {
        Some(codes) if use_labels => codes,
        _ => return Ok(labels),
    };

    if codes.dim() != dims {
        bail!(
            "label table is {:?} but data needs {:?} (time steps x max individuals)",
            codes.dim(),
            dims
        );
    }

    for (label, &code) in labels.iter_mut().zip(codes.iter()) {
        *label = Label::from_code(code, num_pops)?;
    }

    Ok(labels)
}
