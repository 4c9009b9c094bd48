use std::path::PathBuf;
use std::sync::{Mutex, OnceLock, PoisonError};

use clap::{ArgAction, Args, Command, FromArgMatches as _};

use crate::context::{Context, StopHandle};
use crate::error::ContagionError;
use crate::execution_stats::print_execution_statistics;
use crate::log::{info, set_log_level, warn, LevelFilter, LogSpec};
use crate::parameters::{ContextParametersExt, Parameters};
use crate::simulation::{ContextSimulationExt, RunSummary};

/// Default cli arguments for the simulation runner
#[derive(Args, Debug, Default)]
pub struct BaseArgs {
    /// Random seed, overriding the one in the config file
    #[arg(short, long)]
    pub random_seed: Option<u64>,

    /// Optional path for a JSON parameters file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Optional path for report output, overriding the one in the config file
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Write the statistics series and the final agent table
    #[arg(long)]
    pub save_data: bool,

    /// Set logging to the given level or `module=level` filters, comma separated
    #[arg(long)]
    pub log_level: Option<String>,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Show a progress bar of the ticks
    #[arg(long)]
    pub progress_bar: bool,

    /// Print wall time, CPU time and memory use at the end of the run
    #[arg(long)]
    pub timing: bool,
}

fn create_cli() -> Command {
    let cli = Command::new("ixa-contagion");
    BaseArgs::augment_args(cli)
}

fn verbosity_level(verbose: u8) -> Option<LevelFilter> {
    match verbose {
        0 => None,
        1 => Some(LevelFilter::Info),
        2 => Some(LevelFilter::Debug),
        _ => Some(LevelFilter::Trace),
    }
}

fn configure_logging(args: &BaseArgs) -> Result<(), ContagionError> {
    if let Some(log_level) = &args.log_level {
        log_level.parse::<LogSpec>()?.apply();
    }
    if let Some(level) = verbosity_level(args.verbose) {
        set_log_level(level);
    }
    Ok(())
}

/// Run that an interrupt (Ctrl-C, SIGTERM) stops at the next tick boundary.
static INTERRUPTIBLE_RUN: Mutex<Option<StopHandle>> = Mutex::new(None);
static INTERRUPT_HANDLER: OnceLock<bool> = OnceLock::new();

fn interrupt_current_run() {
    let current = INTERRUPTIBLE_RUN
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = current.as_ref() {
        info!("interrupted, stopping after the current tick");
        handle.request_stop();
    }
}

/// Routes interrupts to `handle` instead of killing the process, so an interrupted run still
/// finishes with its summary and reports. The process-wide handler is installed once.
fn stop_on_interrupt(handle: Option<StopHandle>) {
    let installed = *INTERRUPT_HANDLER.get_or_init(|| {
        ctrlc::set_handler(interrupt_current_run)
            .inspect_err(|err| warn!("runs cannot be interrupted gracefully: {err}"))
            .is_ok()
    });
    if installed {
        *INTERRUPTIBLE_RUN.lock().unwrap_or_else(PoisonError::into_inner) = handle;
    }
}

fn parameters_from_args(args: &BaseArgs) -> Result<Parameters, ContagionError> {
    let mut parameters = match &args.config {
        Some(path) => {
            println!("Loading parameters from: {}", path.display());
            Parameters::from_json_file(path)?
        }
        None => Parameters::default(),
    };
    if let Some(seed) = args.random_seed {
        parameters.seed = seed;
    }
    if let Some(output_dir) = &args.output_dir {
        parameters.output.directory.clone_from(output_dir);
    }
    if args.save_data {
        parameters.output.save_data = true;
    }
    Ok(parameters)
}

/// Runs a simulation with the command line arguments of the process.
///
/// # Errors
/// Returns an error if argument parsing, setup or a tick fails
#[allow(clippy::missing_errors_doc)]
pub fn run_with_args() -> Result<(Context, RunSummary), Box<dyn std::error::Error>> {
    let matches = create_cli().get_matches();
    let args = BaseArgs::from_arg_matches(&matches)?;
    Ok(run_with_base_args(&args)?)
}

/// Runs a simulation configured by already parsed arguments.
///
/// # Errors
/// Returns an error if the parameters are invalid or a tick fails
pub fn run_with_base_args(args: &BaseArgs) -> Result<(Context, RunSummary), ContagionError> {
    configure_logging(args)?;
    let parameters = parameters_from_args(args)?;

    let mut context = Context::new();
    context.set_parameters(parameters)?;
    context.init_simulation()?;

    #[cfg(feature = "progress_bar")]
    if args.progress_bar {
        let max_ticks = context.get_parameters().simulation_steps;
        crate::progress::init_tick_progress_bar(max_ticks);
    }

    stop_on_interrupt(Some(context.stop_handle()));
    context.execute();
    stop_on_interrupt(None);
    let summary = context.finish_simulation()?;
    if args.timing {
        if let Some(statistics) = context.execution_statistics() {
            print_execution_statistics(statistics);
        }
    }
    Ok((context, summary))
}
