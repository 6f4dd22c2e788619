use clap::Parser;
use scr_runner::{
    cancel::CancelToken,
    config::ScrConfig,
    flush::FlushFile,
    resmgr::ResourceManagers,
    watchdog::{WatchOutcome, Watchdog, WatchdogTimeouts},
};
use std::{path::PathBuf, process::exit};
use tracing::{error, info, warn};

/// Kill a job step that stopped producing checkpoints
#[derive(Debug, Parser)]
#[command(name = "scr_watchdog", version)]
struct Args {
    /// Shared store directory of the job
    #[arg(short, long)]
    dir: Option<PathBuf>,
    /// Job step to watch and kill
    #[arg(short, long = "jobStepId")]
    job_step_id: Option<String>,
    /// YAML configuration file, defaults to SCR_CONF_FILE
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Log every external command that gets run
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    scr_runner::init_logging();

    exit(watchdog(args));
}

fn watchdog(args: Args) -> i32 {
    let (Some(prefix), Some(job_step)) = (args.dir, args.job_step_id) else {
        error!("Prefix directory (--dir) and job step id (--jobStepId) are required");
        return 1;
    };

    let config = match ScrConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            error!("Failed to load configuration: {error}");
            return 1;
        }
    };

    if !config.enabled {
        info!("SCR is disabled, not watching");
        return 0;
    }

    let timeouts = match WatchdogTimeouts::try_from(&config) {
        Ok(timeouts) => timeouts,
        Err(error) => {
            error!("{error}");
            return 1;
        }
    };

    let resource_manager = match ResourceManagers::load(&config, args.verbose) {
        Ok(resource_manager) => resource_manager,
        Err(error) => {
            error!("{error}");
            return 1;
        }
    };

    let cancel = CancelToken::new();
    if let Err(error) = cancel.cancel_on_signals() {
        warn!("Failed to install signal handlers: {error}");
    }

    let flush = FlushFile::new(&config.bindir, &prefix, args.verbose);
    let mut watchdog = Watchdog::new(&flush, &resource_manager, job_step, timeouts);

    info!(
        normal = timeouts.normal.as_secs(),
        pfs = timeouts.pfs.as_secs(),
        "Watching {}",
        prefix.to_string_lossy()
    );

    match watchdog.run(&cancel) {
        Ok(WatchOutcome::Killed) => {
            info!("Job step killed");
            0
        }
        Ok(WatchOutcome::Cancelled) => 0,
        Err(error) => {
            error!("{error}");
            1
        }
    }
}
