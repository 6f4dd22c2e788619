//! Post-run recovery of datasets from node-local cache into the shared store.
//!
//! A run happens in two phases. Output sets are scavenged first, in ascending order,
//! stopping at the first one that can't be resolved or recovered completely (the barrier).
//! Afterwards the most recent checkpoint before the barrier that is complete in the shared
//! store becomes the current checkpoint, falling back to older checkpoints as needed.

use crate::{
    cancel::CancelToken,
    flush::{dataset_dir, DatasetId, DatasetIndex, FlushError, FlushState},
    liveness::{NodeLiveness, NodeProbe},
    nodeset::NodeSet,
    resmgr::ResourceManager,
    scavenge::{ScavengeEngine, ScavengeRequest},
};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, info, instrument, warn};


#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("No node of the allocation is left to scavenge from")]
    NoLiveNodes,
    #[error("Reconciliation was cancelled")]
    Cancelled,
    #[error("Failed to update current marker to {name} (dataset {id})")]
    SetCurrent {
        id: DatasetId,
        name: String,
        source: FlushError,
    },
}

impl ReconcileError {
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// How a reconciliation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// the current marker now points at this checkpoint
    Current { id: DatasetId, name: String },
    /// the most recent usable checkpoint was already in the shared store
    AlreadyFlushed { id: DatasetId },
    /// no checkpoint could be recovered
    Exhausted,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Current { .. } | Self::AlreadyFlushed { .. } => 0,
            Self::Exhausted => 1,
        }
    }
}

/// Bookkeeping of a single run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileState {
    /// output sets the output phase tried to scavenge
    pub attempted: BTreeSet<DatasetId>,
    /// subset of `attempted` that is complete in the shared store
    pub succeeded: BTreeSet<DatasetId>,
    /// output set at which the output phase stopped
    pub barrier: Option<DatasetId>,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub prefix: PathBuf,
    pub control_dir: PathBuf,
    pub excluded: NodeSet,
    pub verbose: bool,
}

pub struct Reconciler<'a> {
    flush: &'a dyn FlushState,
    index: &'a dyn DatasetIndex,
    scavenger: &'a dyn ScavengeEngine,
    resource_manager: &'a dyn ResourceManager,
    probe: &'a dyn NodeProbe,
    options: ReconcileOptions,
    state: ReconcileState,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        flush: &'a dyn FlushState,
        index: &'a dyn DatasetIndex,
        scavenger: &'a dyn ScavengeEngine,
        resource_manager: &'a dyn ResourceManager,
        probe: &'a dyn NodeProbe,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            flush,
            index,
            scavenger,
            resource_manager,
            probe,
            options,
            state: ReconcileState::default(),
        }
    }

    pub fn state(&self) -> &ReconcileState {
        &self.state
    }

    /// recover datasets of the allocation `job` and establish the current checkpoint
    #[instrument(skip_all, fields(prefix = ?self.options.prefix))]
    pub fn run(&mut self, job: &NodeSet, cancel: &CancelToken) -> Result<Outcome, ReconcileError> {
        let liveness = NodeLiveness::assess(
            job,
            self.resource_manager,
            self.probe,
            &self.options.excluded,
        );
        liveness.log();

        if liveness.up.is_empty() {
            error!("No node of {job} is up, unable to scavenge");
            return Err(ReconcileError::NoLiveNodes);
        }

        self.scavenge_outputs(job, &liveness, cancel)?;
        self.recover_checkpoint(job, &liveness, cancel)
    }

    /// ascending over output sets, stops at the first structural or completeness failure
    fn scavenge_outputs(
        &mut self,
        job: &NodeSet,
        liveness: &NodeLiveness,
        cancel: &CancelToken,
    ) -> Result<(), ReconcileError> {
        info!("Looking for output sets");

        let mut ids = match self.flush.output_dataset_ids() {
            Ok(ids) => ids,
            Err(error) => {
                warn!("Found no output set to scavenge: {error}");
                return Ok(());
            }
        };
        ids.sort_unstable();
        ids.dedup();

        for id in ids {
            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }

            match self.flush.needs_flush(id) {
                Ok(true) => {}
                Ok(false) => {
                    info!("Dataset {id} has already been flushed");
                    continue;
                }
                Err(error) => {
                    // the store can't tell us, later sets can't be trusted either
                    error!("Failed to read flush state of dataset {id}: {error}");
                    self.state.attempted.insert(id);
                    self.state.barrier = Some(id);
                    break;
                }
            }

            info!("Attempting to scavenge dataset {id}");
            self.state.attempted.insert(id);

            let name = match self.flush.dataset_name(id) {
                Ok(name) => name,
                Err(error) => {
                    error!("Failed to read name of dataset {id}: {error}");
                    self.state.barrier = Some(id);
                    break;
                }
            };

            let dir = dataset_dir(&self.options.prefix, id);
            if let Err(error) = fs::create_dir_all(&dir) {
                error!("Failed to create {}: {error}", dir.to_string_lossy());
                self.state.barrier = Some(id);
                break;
            }

            self.transfer(id, &name, &dir, job, liveness);

            if !self.is_complete(id) {
                error!("Dataset {name} is incomplete, not scavenging any later output set");
                self.state.barrier = Some(id);
                break;
            }

            self.state.succeeded.insert(id);
            info!("Scavenged dataset {name} successfully");
        }

        Ok(())
    }

    /// most recent first over checkpoints before the barrier, the first complete one wins
    fn recover_checkpoint(
        &mut self,
        job: &NodeSet,
        liveness: &NodeLiveness,
        cancel: &CancelToken,
    ) -> Result<Outcome, ReconcileError> {
        info!("Looking for most recent checkpoint");

        let before = self.state.barrier;
        let mut ids = match self.flush.checkpoint_dataset_ids(before) {
            Ok(ids) => ids,
            Err(error) => {
                warn!("Found no checkpoint to scavenge: {error}");
                return Ok(Outcome::Exhausted);
            }
        };
        ids.retain(|id| before.map_or(true, |barrier| *id < barrier));
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.dedup();

        for id in ids {
            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }

            if self.state.attempted.contains(&id) {
                if !self.state.succeeded.contains(&id) {
                    info!("Skipping checkpoint dataset {id}, since already failed to scavenge");
                    continue;
                }

                match self.flush.dataset_name(id) {
                    Ok(name) => {
                        info!("Already scavenged checkpoint dataset {id}");
                        return self.update_current(id, name);
                    }
                    Err(error) => {
                        warn!("Failed to read name of checkpoint dataset {id}, skipping it: {error}");
                        continue;
                    }
                }
            }

            match self.flush.needs_flush(id) {
                Ok(false) => {
                    info!("Checkpoint dataset {id} has already been flushed");
                    return Ok(Outcome::AlreadyFlushed { id });
                }
                Ok(true) => {}
                Err(error) => {
                    warn!("Failed to read flush state of checkpoint dataset {id}, skipping it: {error}");
                    continue;
                }
            }

            info!("Attempting to scavenge checkpoint dataset {id}");

            let name = match self.flush.dataset_name(id) {
                Ok(name) => name,
                Err(error) => {
                    warn!("Failed to read name of checkpoint dataset {id}: {error}");
                    continue;
                }
            };

            let dir = dataset_dir(&self.options.prefix, id);
            if let Err(error) = fs::create_dir_all(&dir) {
                warn!("Failed to create {}, skipping checkpoint: {error}", dir.to_string_lossy());
                continue;
            }

            self.transfer(id, &name, &dir, job, liveness);

            if self.is_complete(id) {
                return self.update_current(id, name);
            }

            warn!("Checkpoint dataset {name} is incomplete, trying an older one");
        }

        Ok(Outcome::Exhausted)
    }

    fn transfer(&self, id: DatasetId, name: &str, dir: &Path, job: &NodeSet, liveness: &NodeLiveness) {
        info!(
            "Scavenging files from cache for {name} to {}",
            dir.to_string_lossy()
        );

        if self.options.verbose {
            info!(
                up = %liveness.up,
                down = %liveness.down,
                control_dir = ?self.options.control_dir,
                "Scavenge request for dataset {id}"
            );
        }

        let request = ScavengeRequest {
            id,
            control_dir: &self.options.control_dir,
            prefix: &self.options.prefix,
            job_nodes: job,
            up: &liveness.up,
            down: &liveness.down,
        };

        match self.scavenger.scavenge(&request) {
            Ok(()) => info!(
                "Done scavenging files from cache for {name} to {}",
                dir.to_string_lossy()
            ),
            Err(error) => error!(
                "Scavenge files from cache for {name} to {} failed: {error}",
                dir.to_string_lossy()
            ),
        }
    }

    fn is_complete(&self, id: DatasetId) -> bool {
        info!("Checking that dataset {id} is complete");

        match self.index.build(id) {
            Ok(complete) => complete,
            Err(error) => {
                error!("Failed to verify dataset {id}: {error}");
                false
            }
        }
    }

    /// the only place the current marker gets written, every caller returns right after
    fn update_current(&mut self, id: DatasetId, name: String) -> Result<Outcome, ReconcileError> {
        info!("Updating current marker in index to {name}");

        match self.index.set_current(&name) {
            Ok(()) => Ok(Outcome::Current { id, name }),
            Err(source) => {
                error!("Failed to update current marker to {name}: {source}");
                Err(ReconcileError::SetCurrent { id, name, source })
            }
        }
    }
}
