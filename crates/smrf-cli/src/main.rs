//! `smrf`: distribute station weather onto a basin grid.

mod load;
mod sink;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use smrf_core::{Smrf, SmrfConfig, SmrfError};

use load::Loader;
use sink::JsonLinesSink;

#[derive(Parser)]
#[command(name = "smrf", version, about = "Spatial modeling for resources framework")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// Run configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Distribute every time step and write the outputs
    Run {
        #[command(flatten)]
        args: ConfigArgs,
        /// Output directory, overriding output.out_location
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Parse and validate a configuration
    Validate(ConfigArgs),
    /// Print the stage order and time axis
    Info(ConfigArgs),
}

fn load_config(args: &ConfigArgs) -> Result<SmrfConfig> {
    SmrfConfig::from_file(&args.config).with_context(|| format!("loading {}", args.config.display()))
}

fn build(args: &ConfigArgs) -> Result<Smrf> {
    let cfg = load_config(args)?;
    let inputs = Loader::new(&args.config).inputs(&cfg)?;
    Ok(Smrf::new(cfg, inputs)?)
}

fn run(args: &ConfigArgs, output: Option<PathBuf>) -> Result<()> {
    let cfg = load_config(args)?;
    let loader = Loader::new(&args.config);
    let dir = output.unwrap_or_else(|| loader.path(&cfg.output.out_location));
    let inputs = loader.inputs(&cfg)?;
    let mut model = Smrf::new(cfg, inputs)?;
    let mut sink = JsonLinesSink::create(&dir).with_context(|| format!("creating {}", dir.display()))?;
    info!(dir = %dir.display(), "writing outputs");
    model.run(&mut sink)?;
    Ok(())
}

fn info(args: &ConfigArgs) -> Result<()> {
    let model = build(args)?;
    let axis = model.axis();
    println!("time steps: {}", axis.len());
    if let (Some(first), Some(last)) = (axis.steps.first(), axis.steps.last()) {
        println!("window:     {first} .. {last} every {} min", axis.step_minutes);
    }
    println!("stages:");
    for (i, name) in model.stage_order().iter().enumerate() {
        println!("  {:>2}. {name}", i + 1);
    }
    println!("outputs:    {}", model.output_plan().variables.join(", "));
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let result = match &cli.command {
        Commands::Run { args, output } => run(args, output.clone()),
        Commands::Validate(args) => load_config(args).map(|cfg| {
            info!(steps = cfg.time_axis().map_or(0, |a| a.len()), "configuration is valid");
        }),
        Commands::Info(args) => info(args),
    };

    if let Err(e) = &result {
        match e.downcast_ref::<SmrfError>() {
            Some(inner) => error!(kind = inner.kind(), "{e:#}"),
            None => error!("{e:#}"),
        }
    }
    result
}
