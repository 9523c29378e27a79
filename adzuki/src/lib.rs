pub mod common_io;
pub mod engine;
pub mod frequency;
pub mod genotype;
pub mod label;
pub mod mixture;
pub mod numeric;
pub mod objective;
pub mod options;
pub mod output;
pub mod regime;
pub mod responsibility;
pub mod simulate;
pub mod smoother;
pub mod state;

pub use engine::{Engine, InferenceReport};
pub use genotype::{GenotypeData, GenotypeTensor};
pub use options::InferenceOptions;
pub use regime::{Cavi, InferenceRegime, Svi};
pub use smoother::{SmootherFactory, TrajectorySmoother, VariationalKalman};
