use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tdm_common::db::core::SystemDB;
use tdm_common::db::parser::{nets, system};
use tdm_common::util::config::Config;
use tdm_common::util::profiler::ScopedTimer;
use tdm_common::util::{generator, logger};
use tdm_router::{RouteOutcome, verify};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Route the configured system and net files and write the summary.
    Route,
    /// Route, then run the structural validity check.
    Check,
    /// Write a random mesh topology and signal set.
    Generate {
        #[arg(long, default_value_t = 16)]
        fpgas: usize,
        #[arg(long, default_value_t = 200)]
        signals: usize,
        #[arg(long, default_value_t = 4)]
        max_sinks: usize,
        #[arg(long, default_value = "inputs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    logger::init();
    let args = Args::parse();

    let config = if args.config.exists() {
        log::info!("Loading configuration from {:?}", args.config);
        let config_str = std::fs::read_to_string(&args.config)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config TOML: {}", e))?
    } else {
        log::warn!(
            "Configuration file {:?} not found. Using internal defaults.",
            args.config
        );
        Config::default()
    };

    match args.command.unwrap_or(Commands::Route) {
        Commands::Generate {
            fpgas,
            signals,
            max_sinks,
            output_dir,
        } => {
            if fpgas < 2 {
                return Err(anyhow::anyhow!(
                    "At least 2 FPGAs are needed, got {}",
                    fpgas
                ));
            }
            let (sys, net) =
                generator::generate_random_benchmark(&output_dir, fpgas, signals, max_sinks)
                    .context(format!("Failed to write benchmark into '{}'", output_dir))?;
            log::info!("Generated: {} and {}", sys.display(), net.display());
        }
        Commands::Route => {
            let timer = ScopedTimer::new("Total");
            let (_, outcome) = run_routing(&config)?;
            write_summary(&config.input.output_file, &outcome, timer.elapsed().as_secs_f64())?;
        }
        Commands::Check => {
            let timer = ScopedTimer::new("Total");
            let (db, outcome) = run_routing(&config)?;
            write_summary(&config.input.output_file, &outcome, timer.elapsed().as_secs_f64())?;

            let report = verify::run(&db.signals, &db.topology, &outcome.state);
            if !report.is_valid() {
                for v in &report.violations {
                    eprintln!("{}", v);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn validate_input_paths(config: &Config) -> anyhow::Result<()> {
    for file in [&config.input.system_file, &config.input.net_file] {
        if !Path::new(file).exists() {
            return Err(anyhow::anyhow!("Input file missing: {}", file));
        }
    }
    Ok(())
}

fn prepare_output_dir(path_str: &str) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(path_str).parent()
        && !parent.exists()
        && !parent.as_os_str().is_empty()
    {
        log::info!("Creating output directory: {:?}", parent);
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn run_routing(config: &Config) -> anyhow::Result<(SystemDB, RouteOutcome)> {
    validate_input_paths(config)?;

    let mut db = SystemDB::new();
    log::info!("Parsing System: {}", config.input.system_file);
    system::parse(&mut db.topology, &config.input.system_file)?;
    log::info!("Parsing Nets: {}", config.input.net_file);
    nets::parse(&mut db, &config.input.net_file)?;

    log::info!("Starting Routing...");
    let outcome = tdm_router::route(&mut db, config).context("Routing failed")?;
    Ok((db, outcome))
}

fn write_summary(filename: &str, outcome: &RouteOutcome, seconds: f64) -> anyhow::Result<()> {
    use std::io::Write;
    prepare_output_dir(filename)?;
    log::info!("Writing result to {}", filename);
    let mut file = std::fs::File::create(filename)
        .context(format!("Failed to create output file: {}", filename))?;
    writeln!(file, "cost = {}", outcome.final_cost.round() as i64)?;
    writeln!(file, "runtime = {:.3} seconds", seconds)?;
    Ok(())
}
