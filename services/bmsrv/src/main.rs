//! Battery management service (bmsrv)
//!
//! Drives a BYD Battery-Box Commercial C130 cluster: protection limits,
//! hardware revision detection and start/stop sequencing.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use bmsrv::config::SERVICE_NAME;
use bmsrv::{AppConfig, BatteryService, SimulatedBattery};
use common::CancellationToken;
use errors::{VoltageErrorTrait, VoltageResult};
use voltage_bms::{protocol, StartStop, Task};

/// Command-line arguments for bmsrv
#[derive(Parser, Clone)]
#[command(
    name = "bmsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Battery Management Service",
    long_about = None
)]
struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone)]
enum Command {
    /// Run the control cycle against the simulated battery
    Run {
        /// Request START once activated
        #[arg(long)]
        start: bool,

        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Validate the configuration and exit
    Validate {
        /// Print the effective configuration as YAML
        #[arg(long)]
        print: bool,
    },
    /// List the register tasks
    Tasks,
}

fn print_tasks(title: &str, tasks: &[Task]) {
    println!("{}", title);
    for task in tasks {
        println!(
            "  0x{:04X}  FC{:02}  {:>3} regs  {:?}  {} channels",
            task.start(),
            task.function().code(),
            task.register_count(),
            task.priority(),
            task.targets().len()
        );
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("bmsrv: [{}] {}", e.error_code(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run(args: Args) -> VoltageResult<()> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    config.logging.ansi = !args.no_color;
    common::init_logging(&config.logging)?;

    match args.command.unwrap_or(Command::Run {
        start: false,
        cycles: None,
    }) {
        Command::Validate { print } => {
            if print {
                println!("{}", serde_yaml::to_string(&config)?);
            }
            info!("Validation completed successfully");
        },
        Command::Tasks => {
            print_tasks("Baseline tasks:", &protocol::build_initial_tasks()?);
            print_tasks("Added on current hardware:", &protocol::revision_tasks()?);
        },
        Command::Run { start, cycles } => {
            info!(
                service = SERVICE_NAME,
                modules = config.battery.number_of_modules,
                "Starting with simulated battery"
            );
            let battery = Arc::new(SimulatedBattery::new(
                &config.simulator,
                config.battery.number_of_modules,
            ));
            let service = BatteryService::new(&config, battery)?;
            if start {
                service.driver().set_target(StartStop::Start);
            }

            let token = CancellationToken::new();
            let watcher = common::cancel_on_shutdown(token.clone());
            service.run(token.clone(), cycles).await?;
            token.cancel();
            let _ = watcher.await;
        },
    }
    Ok(())
}
