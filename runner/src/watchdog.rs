//! Hang detection for a running job step.
//!
//! The watchdog periodically samples the latest dataset and its location from the flush state.
//! If two consecutive samples are identical no checkpointing happened in between and the job
//! step gets killed. While the latest dataset is being flushed to the shared store the longer
//! `pfs` timeout is used for the next poll.

use crate::{
    cancel::CancelToken,
    config::{ConfigErrors, ScrConfig},
    flush::{FlushState, Sample},
    resmgr::{ResourceManager, ResourceManagerError},
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};


#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("Failed to kill the hung job step")]
    Kill(#[from] ResourceManagerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogTimeouts {
    /// wait between polls under normal circumstances
    pub normal: Duration,
    /// wait between polls while the shared store is being written
    pub pfs: Duration,
}

impl WatchdogTimeouts {
    pub fn interval_for(&self, sample: &Sample) -> Duration {
        if sample.is_flushing() {
            self.pfs
        } else {
            self.normal
        }
    }
}

impl TryFrom<&ScrConfig> for WatchdogTimeouts {
    type Error = ConfigErrors;

    fn try_from(config: &ScrConfig) -> Result<Self, Self::Error> {
        let (normal, pfs) = config.watchdog_timeouts()?;

        Ok(Self { normal, pfs })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// no activity since the previous poll
    Kill,
    /// sleep this long before the next poll
    Continue(Duration),
}

/// decide on a fresh sample, `previous` is `None` before the first poll
pub fn decide(previous: Option<&Sample>, current: &Sample, timeouts: &WatchdogTimeouts) -> Decision {
    match previous {
        Some(previous) if previous == current => Decision::Kill,
        _ => Decision::Continue(timeouts.interval_for(current)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Killed,
    Cancelled,
}

pub struct Watchdog<'a> {
    flush: &'a dyn FlushState,
    resource_manager: &'a dyn ResourceManager,
    job_step: String,
    timeouts: WatchdogTimeouts,
    previous: Option<Sample>,
    interval: Duration,
}

impl<'a> Watchdog<'a> {
    pub fn new(
        flush: &'a dyn FlushState,
        resource_manager: &'a dyn ResourceManager,
        job_step: impl Into<String>,
        timeouts: WatchdogTimeouts,
    ) -> Self {
        Self {
            flush,
            resource_manager,
            job_step: job_step.into(),
            timeouts,
            previous: None,
            interval: timeouts.normal,
        }
    }

    /// time to sleep before the next poll
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn step(&mut self, sample: Sample) -> Decision {
        let decision = decide(self.previous.as_ref(), &sample, &self.timeouts);

        if let Decision::Continue(next) = decision {
            self.interval = next;
            self.previous = Some(sample);
        }

        decision
    }

    fn poll(&self) -> Sample {
        match self.flush.latest_sample() {
            Ok(sample) => sample,
            Err(error) => {
                // same as finding no dataset at all
                warn!("Failed to read latest dataset: {error}");
                Sample::default()
            }
        }
    }

    /// poll until the job step looks hung and kill it, or until `cancel` fires
    #[instrument(skip_all, fields(job_step = %self.job_step))]
    pub fn run(&mut self, cancel: &CancelToken) -> Result<WatchOutcome, WatchdogError> {
        loop {
            if cancel.sleep(self.interval) {
                info!("Watchdog cancelled");
                return Ok(WatchOutcome::Cancelled);
            }

            let sample = self.poll();
            debug!(sample = %sample, "Polled flush state");

            if self.step(sample) == Decision::Kill {
                info!(
                    "No checkpoint activity, killing job step {} using {}",
                    self.job_step,
                    self.resource_manager.name()
                );
                self.resource_manager.kill_job_step(&self.job_step)?;

                return Ok(WatchOutcome::Killed);
            }
        }
    }
}
