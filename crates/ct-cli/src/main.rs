//! ctopt: trial recruitment design CLI

mod trial_spec;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ct_core::Trial;
use ct_design::{AllocationOptimizer, DesignConfig};
use ct_prob::enrollment::{mean, variance};
use ct_prob::{
    CenterModel, EnrollmentLaw, InversionConfig, SpectralConfig, TrialEnrollment, cdf_many,
    expected_cost, mean_cost, pmf, pmf_auto,
};
use std::path::{Path, PathBuf};

use trial_spec::TrialSpec;

#[derive(Parser)]
#[command(name = "ctopt")]
#[command(about = "ctopt - cost-optimal multi-country trial recruitment design")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// Threads for PGF sampling and batched CDFs (0 = auto)
    #[arg(long, global = true, default_value = "0")]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Per-center moments and costs; trial totals when centers are known
    Summary {
        /// Trial file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Centers per country, overriding the file (comma separated)
        #[arg(long, value_delimiter = ',')]
        centers: Option<Vec<u32>>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Exact enrollment PMF by spectral recovery
    Pmf {
        /// Trial file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Centers per country, overriding the file (comma separated)
        #[arg(long, value_delimiter = ',')]
        centers: Option<Vec<u32>>,

        /// Single-center PMF of this country (index) instead of the trial total
        #[arg(long)]
        country: Option<usize>,

        /// Grid size (power of two). Chosen automatically when omitted.
        #[arg(short, long)]
        n: Option<usize>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// P(N <= x) and P(N > x) of the trial total
    Cdf {
        /// Trial file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Centers per country, overriding the file (comma separated)
        #[arg(long, value_delimiter = ',')]
        centers: Option<Vec<u32>>,

        /// Evaluation points (comma separated)
        #[arg(short = 'x', long = "at", value_delimiter = ',', required = true)]
        at: Vec<f64>,

        /// Absolute tolerance of the inversion
        #[arg(long, default_value = "1e-10")]
        tol: f64,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Cheapest allocation with P(N > ntarget) >= ps
    Optimize {
        /// Trial file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Enrollment target
        #[arg(long)]
        ntarget: f64,

        /// Required success probability
        #[arg(long)]
        ps: f64,

        /// Skip the spectral cross-check of the exact probability
        #[arg(long)]
        no_cross_check: bool,

        /// Also write the trial file with the optimized centers attached
        #[arg(long)]
        write_trial: Option<PathBuf>,

        /// Output file for the design report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.threads > 0 {
        // Ignore error if a global pool is already initialized.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(cli.threads).build_global();
    }

    match cli.command {
        Commands::Summary { input, centers, output } => {
            cmd_summary(&input, centers, output.as_ref())
        }
        Commands::Pmf { input, centers, country, n, output } => {
            cmd_pmf(&input, centers, country, n, output.as_ref())
        }
        Commands::Cdf { input, centers, at, tol, output } => {
            cmd_cdf(&input, centers, &at, tol, output.as_ref())
        }
        Commands::Optimize { input, ntarget, ps, no_cross_check, write_trial, output } => {
            let cross_check = !no_cross_check;
            cmd_optimize(&input, ntarget, ps, cross_check, write_trial.as_ref(), output.as_ref())
        }
        Commands::Version => {
            println!("ctopt {}", ct_core::VERSION);
            Ok(())
        }
    }
}

fn load_trial(input: &Path, centers: Option<Vec<u32>>) -> Result<(TrialSpec, Trial)> {
    tracing::info!(path = %input.display(), "loading trial");
    let mut spec =
        TrialSpec::load(input).with_context(|| format!("reading {}", input.display()))?;
    if centers.is_some() {
        spec.centers = centers;
    }
    let trial = spec.build()?;
    tracing::info!(countries = trial.len(), td = trial.td(), "trial loaded");
    Ok((spec, trial))
}

fn attached_law(trial: &Trial) -> Result<TrialEnrollment> {
    if trial.centers().is_none() {
        anyhow::bail!("no centers: add \"centers\" to the trial file or pass --centers");
    }
    Ok(TrialEnrollment::attached(trial)?)
}

fn cmd_summary(input: &Path, centers: Option<Vec<u32>>, output: Option<&PathBuf>) -> Result<()> {
    let (spec, trial) = load_trial(input, centers)?;
    let countries: Vec<serde_json::Value> = trial
        .countries()
        .iter()
        .enumerate()
        .map(|(i, c)| {
            serde_json::json!({
                "name": spec.label(i),
                "expected_window": CenterModel::new(c).expected_window(),
                "mean": mean(c),
                "variance": variance(c),
                "mean_cost": mean_cost(c),
            })
        })
        .collect();

    let totals = match trial.centers() {
        Some(centers) => {
            let law = TrialEnrollment::attached(&trial)?;
            serde_json::json!({
                "centers": centers,
                "mean": law.mean(),
                "variance": law.variance(),
                "expected_cost": expected_cost(&trial, centers)?,
            })
        }
        None => serde_json::Value::Null,
    };

    write_json(
        output,
        serde_json::json!({
            "td": trial.td(),
            "countries": countries,
            "trial": totals,
        }),
    )
}

fn cmd_pmf(
    input: &Path,
    centers: Option<Vec<u32>>,
    country: Option<usize>,
    n: Option<usize>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let (spec, trial) = load_trial(input, centers)?;
    let config = SpectralConfig::default();
    let law: Box<dyn EnrollmentLaw> = match country {
        Some(i) => {
            let c = trial
                .countries()
                .get(i)
                .with_context(|| format!("country index {i} out of range (0..{})", trial.len()))?;
            tracing::info!(country = %spec.label(i), "single-center pmf");
            Box::new(CenterModel::new(c))
        }
        None => Box::new(attached_law(&trial)?),
    };
    let p = match n {
        Some(n) => pmf(law.as_ref(), n, &config)?,
        None => pmf_auto(law.as_ref(), &config)?,
    };
    write_json(
        output,
        serde_json::json!({
            "n": p.len(),
            "mean": law.mean(),
            "variance": law.variance(),
            "pmf": p,
        }),
    )
}

fn cmd_cdf(
    input: &Path,
    centers: Option<Vec<u32>>,
    at: &[f64],
    tol: f64,
    output: Option<&PathBuf>,
) -> Result<()> {
    let (_, trial) = load_trial(input, centers)?;
    let law = attached_law(&trial)?;
    let config = InversionConfig { tol, ..Default::default() };
    let cdf = cdf_many(&law, at, &config)?;
    let ccdf: Vec<f64> = cdf.iter().map(|v| 1.0 - v).collect();
    write_json(
        output,
        serde_json::json!({
            "x": at,
            "cdf": cdf,
            "ccdf": ccdf,
        }),
    )
}

fn cmd_optimize(
    input: &Path,
    ntarget: f64,
    ps: f64,
    cross_check: bool,
    write_trial: Option<&PathBuf>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let (mut spec, mut trial) = load_trial(input, None)?;
    let config = DesignConfig { solver: spec.solver_config()?, cross_check, ..Default::default() };
    let optimizer = AllocationOptimizer::new(config);
    let report = optimizer.optimize(&trial, ntarget, ps)?;
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }

    if let Some(path) = write_trial {
        trial.attach(&report.allocation)?;
        spec.centers = trial.centers().map(<[u32]>::to_vec);
        std::fs::write(path, serde_json::to_string_pretty(&spec)?)?;
        tracing::info!(path = %path.display(), allocation = %report.allocation, "trial written");
    }

    write_json(output, serde_json::to_value(&report)?)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
