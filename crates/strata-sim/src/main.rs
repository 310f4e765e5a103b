use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use strata_graph::SyncConfig;
use strata_sim::{run_simulator, SimulatorConfig};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("strata-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Strata sync engine simulator")
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Save, retrieve and delete stories under injected faults")
                .arg(
                    Arg::new("stories")
                        .long("stories")
                        .default_value("20")
                        .value_parser(value_parser!(usize))
                        .help("Number of stories"),
                )
                .arg(
                    Arg::new("moments")
                        .long("moments")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Moments per story"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.05")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a remote call fails transiently"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                ),
        )
        .subcommand(
            Command::new("config").about("Show the effective configuration").arg(
                Arg::new("print")
                    .long("print")
                    .action(ArgAction::SetTrue)
                    .help("Print the configuration as TOML"),
            ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<SyncConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => strata_test_utils::fast_config(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json"));
    let sync = load_config(&matches)?;

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let failure_rate: f64 = arg(args, "failure-rate")?;
            if !(0.0..=1.0).contains(&failure_rate) {
                bail!("--failure-rate must be between 0 and 1, got {failure_rate}");
            }
            let config = SimulatorConfig {
                seed: arg(args, "seed")?,
                stories: arg(args, "stories")?,
                moments: arg(args, "moments")?,
                failure_rate,
                sync,
            };

            println!("Running Strata simulator...");
            println!("Stories: {}", config.stories);
            println!("Moments: {}", config.moments);
            println!("Failure rate: {}", config.failure_rate);
            println!("Seed: {}", config.seed);
            println!();

            let report = run_simulator(config).await?;
            println!("{}", report.generate_text());
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("config", args)) => {
            if args.get_flag("print") {
                print!("{}", sync.to_toml_string()?);
            } else {
                println!("configuration ok");
            }
        }
        _ => {
            cli().print_help()?;
            println!();
        }
    }
    Ok(())
}
