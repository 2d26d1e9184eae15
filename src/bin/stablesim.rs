use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use stablesim::report::{
    create_timestamped_output_dir, trajectory_rows, write_csv, write_experiment, write_summary_json,
    write_sweep,
};
use stablesim::{
    run_monte_carlo, run_parameter_sweep, run_trial, DynamicsModel, ExperimentConfig,
    ShockDistribution, ShockPlan, ShockSpec, SweepAxis, SweepParameter, SystemParameters,
    TrialResult,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Stress-test an algorithmic stablecoin model under shocks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// JSON experiment configuration; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Demand elasticity (epsilon)
    #[arg(long, global = true)]
    elasticity: Option<f64>,

    /// Base random seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Steps per trial
    #[arg(long, global = true)]
    steps: Option<usize>,

    /// Trials per Monte Carlo batch
    #[arg(long, global = true)]
    trials: Option<usize>,

    /// Use the reflexive dynamics model
    #[arg(long, global = true)]
    reflexive: bool,

    /// Write CSV/JSON results into a timestamped directory under this path
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Single trial with a one-time collateral shock
    CollateralShock {
        /// Fractional shock, e.g. -0.4 for a 40% drop
        #[arg(long, default_value_t = -0.4, allow_negative_numbers = true)]
        magnitude: f64,
        /// Step at which the shock fires
        #[arg(long, default_value_t = 100)]
        time: u64,
    },
    /// Single trial with a one-time liquidity shock
    LiquidityCrisis {
        #[arg(long, default_value_t = -0.9, allow_negative_numbers = true)]
        magnitude: f64,
        #[arg(long, default_value_t = 100)]
        time: u64,
    },
    /// Monte Carlo batch; sampled collateral stress unless a shock is given
    MonteCarlo {
        /// Fixed collateral shock magnitude instead of sampled stress
        #[arg(long, allow_negative_numbers = true)]
        magnitude: Option<f64>,
        /// Trigger step of the fixed collateral shock
        #[arg(long, default_value_t = 100)]
        time: u64,
    },
    /// Collapse probability over a parameter grid
    Sweep {
        /// Grid points per default axis
        #[arg(long, default_value_t = 10)]
        points: usize,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn load_config(common: &CommonArgs) -> Result<ExperimentConfig> {
    let mut config = match &common.config {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ExperimentConfig::default(),
    };

    if let Some(elasticity) = common.elasticity {
        config.parameters.demand_elasticity = elasticity;
    }
    if let Some(seed) = common.seed {
        config.parameters.random_seed = Some(seed);
    }
    if let Some(steps) = common.steps {
        config.n_steps = steps;
    }
    if let Some(trials) = common.trials {
        config.n_trials = trials;
    }
    if common.reflexive {
        config.parameters.model = DynamicsModel::Reflexive;
    }
    Ok(config)
}

fn output_dir(common: &CommonArgs) -> Result<Option<PathBuf>> {
    common
        .out
        .as_deref()
        .map(|root| {
            create_timestamped_output_dir(root)
                .with_context(|| format!("failed to create output directory under {}", root.display()))
        })
        .transpose()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.common.verbose);

    let config = load_config(&cli.common)?;
    let params = config.system_parameters().context("invalid parameters")?;
    let out = output_dir(&cli.common)?;

    match cli.command {
        Command::CollateralShock { magnitude, time } => {
            let shock = ShockSpec::collateral(magnitude, time);
            single_trial(&params, config.n_steps, &shock, out.as_deref())
        }
        Command::LiquidityCrisis { magnitude, time } => {
            let shock = ShockSpec::liquidity(magnitude, time);
            single_trial(&params, config.n_steps, &shock, out.as_deref())
        }
        Command::MonteCarlo { magnitude, time } => {
            let plan = match magnitude {
                Some(magnitude) => ShockPlan::Fixed(ShockSpec::collateral(magnitude, time)),
                None => batch_plan(&config),
            };
            monte_carlo(&params, &config, &plan, out.as_deref())
        }
        Command::Sweep { points } => {
            let axes = if config.sweep_axes.is_empty() {
                vec![
                    SweepAxis::new(SweepParameter::DemandElasticity, 0.1, 5.0, points),
                    SweepAxis::new(SweepParameter::MintCoefficient, 0.01, 1.0, points),
                ]
            } else {
                config.sweep_axes.clone()
            };
            sweep(&params, &config, &axes, &batch_plan(&config), out.as_deref())
        }
    }
}

/// Configured shock plan, or sampled collateral stress when none is set
fn batch_plan(config: &ExperimentConfig) -> ShockPlan {
    match config.shock {
        ShockPlan::None => ShockPlan::Sampled(ShockDistribution::collateral_stress()),
        plan => plan,
    }
}

fn single_trial(
    params: &SystemParameters,
    n_steps: usize,
    shock: &ShockSpec,
    out: Option<&Path>,
) -> Result<()> {
    info!(
        variable = %shock.target,
        magnitude = shock.magnitude,
        step = shock.trigger_step,
        "running single trial"
    );
    let result = run_trial(params, n_steps, Some(shock)).context("trial rejected")?;
    print_trial(&result);

    if let Some(dir) = out {
        let trajectory_path = dir.join("trajectory.csv");
        write_csv(
            fs::File::create(&trajectory_path)?,
            &trajectory_rows(&result.trajectory, params.dt),
        )
        .with_context(|| format!("failed to write {}", trajectory_path.display()))?;

        let metrics_path = dir.join("metrics.json");
        write_summary_json(fs::File::create(&metrics_path)?, &result.metrics)
            .with_context(|| format!("failed to write {}", metrics_path.display()))?;
        println!("Results written to {}", dir.display());
    }
    Ok(())
}

fn print_trial(result: &TrialResult) {
    let metrics = &result.metrics;
    println!("Peg deviation integral: {:.4}", metrics.peg_deviation_integral);
    match metrics.time_to_collapse {
        Some(step) => println!("Time to collapse: step {step}"),
        None => println!("Time to collapse: never"),
    }
    println!("Max drawdown: {:.4}", metrics.max_drawdown);
    println!("Min price: {:.4}", metrics.min_price);
    println!("Terminal price: {:.4}", metrics.terminal_price);
    println!("Peak arbitrage opportunity: {:.2}", metrics.peak_arbitrage);
    println!("Recovered: {}", metrics.recovered);
    if let Some(failure) = &result.failure {
        println!("Failed at step {}: {}", failure.step, failure.reason);
    }
}

fn monte_carlo(
    params: &SystemParameters,
    config: &ExperimentConfig,
    plan: &ShockPlan,
    out: Option<&Path>,
) -> Result<()> {
    let result = run_monte_carlo(params, config.n_trials, config.n_steps, plan)
        .context("monte carlo batch rejected")?;

    println!("Base seed: {}", result.base_seed);
    println!(
        "Trials: {} completed, {} failed",
        result.completed_trials, result.failed_trials
    );
    println!("Collapse probability: {}", fmt_probability(result.collapse_probability));
    println!("Recovery probability: {}", fmt_probability(result.recovery_probability));
    if let Some(summary) = result.time_to_collapse {
        println!("Mean time to collapse: {:.1} steps", summary.mean);
    }
    if let Some(summary) = result.max_drawdown {
        println!("Mean max drawdown: {:.4}", summary.mean);
    }

    if let Some(dir) = out {
        write_experiment(dir, &result).with_context(|| format!("failed to write results to {}", dir.display()))?;
        println!("Results written to {}", dir.display());
    }
    Ok(())
}

fn sweep(
    params: &SystemParameters,
    config: &ExperimentConfig,
    axes: &[SweepAxis],
    plan: &ShockPlan,
    out: Option<&Path>,
) -> Result<()> {
    let result = run_parameter_sweep(params, axes, config.n_trials, config.n_steps, plan)
        .context("parameter sweep rejected")?;

    for cell in &result.cells {
        let point = cell
            .values
            .iter()
            .map(|(parameter, value)| format!("{parameter}={value:.3}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{point}: collapse {}, failed {}",
            fmt_probability(cell.collapse_probability),
            cell.failed_trials
        );
    }

    if let Some(dir) = out {
        write_sweep(dir, &result).with_context(|| format!("failed to write results to {}", dir.display()))?;
        println!("Results written to {}", dir.display());
    }
    Ok(())
}

fn fmt_probability(value: Option<f64>) -> String {
    value.map_or_else(|| "undefined".to_string(), |p| format!("{p:.3}"))
}
