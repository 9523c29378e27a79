mod run_fit;

use run_fit::*;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "adzuki")]
#[command(about = "Admixture dynamics from time-series genotypes by variational inference")]
struct Cli {
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate admixed time-series genotypes and fit them by coordinate ascent
    Cavi(CaviArgs),
    /// Simulate admixed time-series genotypes and fit them by stochastic VI
    Svi(SviArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.commands {
        Commands::Cavi(args) => {
            run_cavi(args)?;
        }
        Commands::Svi(args) => {
            run_svi(args)?;
        }
    }

    Ok(())
}
