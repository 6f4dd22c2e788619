use clap::Parser;
use scr_runner::{
    cancel::CancelToken,
    config::ScrConfig,
    flush::{FlushFile, ScrIndex},
    liveness::CommandProbe,
    reconcile::{ReconcileOptions, Reconciler},
    resmgr::{ResourceManager, ResourceManagers},
    scavenge::CommandScavenge,
};
use std::{path::PathBuf, process::exit, time::Instant};
use tracing::{error, info, warn};

/// Scavenge datasets from node-local cache into the shared store once the last run of an
/// allocation has ended, and point the index at the most recent complete checkpoint
#[derive(Debug, Parser)]
#[command(name = "scr_postrun", version)]
struct Args {
    /// Shared store directory, defaults to SCR_PREFIX or the working directory
    #[arg(short, long)]
    prefix: Option<PathBuf>,
    /// Log every external command that gets run
    #[arg(short, long)]
    verbose: bool,
    /// YAML configuration file, defaults to SCR_CONF_FILE
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    scr_runner::init_logging();

    exit(postrun(args));
}

fn postrun(args: Args) -> i32 {
    let mut config = match ScrConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            error!("Failed to load configuration: {error}");
            return 1;
        }
    };

    if !config.enabled {
        info!("SCR is disabled, nothing to scavenge");
        return 0;
    }

    if config.preflight_checks() {
        return 1;
    }

    let start = Instant::now();
    info!("Started");

    let code = reconcile(&args, &mut config);

    info!("Ended, secs: {}", start.elapsed().as_secs());
    info!("Exit code: {code}");

    code
}

fn reconcile(args: &Args, config: &mut ScrConfig) -> i32 {
    let prefix = match config.resolve_prefix(args.prefix.as_deref()) {
        Ok(prefix) => prefix,
        Err(error) => {
            error!("{error}");
            return 1;
        }
    };

    let resource_manager = match ResourceManagers::load(config, args.verbose) {
        Ok(resource_manager) => resource_manager,
        Err(error) => {
            error!("{error}");
            return 1;
        }
    };

    let job = match config.resolve_nodelist(&resource_manager) {
        Ok(job) => job,
        Err(error) => {
            error!("Could not identify the nodes of the allocation: {error}");
            return 1;
        }
    };

    let control_dir = config.control_dir(resource_manager.job_id().as_deref());
    info!(
        prefix = %prefix.to_string_lossy(),
        nodes = %job,
        resource_manager = resource_manager.name(),
        "Scavenging"
    );

    let cancel = CancelToken::new();
    if let Err(error) = cancel.cancel_on_signals() {
        warn!("Failed to install signal handlers: {error}");
    }

    let flush = FlushFile::new(&config.bindir, &prefix, args.verbose);
    let index = ScrIndex::new(&config.bindir, &prefix, args.verbose);
    let scavenger = CommandScavenge::new(&config.bindir, config.use_containers, args.verbose);
    let probe = CommandProbe::new(
        &config.bindir,
        &control_dir,
        config.ping_timeout(),
        config.check_capacity,
        args.verbose,
    );
    let options = ReconcileOptions {
        prefix,
        control_dir,
        excluded: config.exclude_nodes.clone(),
        verbose: args.verbose,
    };

    let mut reconciler = Reconciler::new(
        &flush,
        &index,
        &scavenger,
        &resource_manager,
        &probe,
        options,
    );

    match reconciler.run(&job, &cancel) {
        Ok(outcome) => {
            info!(?outcome, "Reconciliation finished");
            outcome.exit_code()
        }
        Err(error) => {
            error!("{error}");
            error.exit_code()
        }
    }
}
