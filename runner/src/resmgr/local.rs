use super::{ResourceManager, ResourceManagerError};
use crate::nodeset::NodeSet;
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use tracing::{error, info};

/// Single node "allocation" without a scheduler, job steps are plain process ids
#[derive(Debug, Clone, Default)]
pub struct LocalManager {
    job_id: Option<String>,
}

impl LocalManager {
    pub fn new(job_id: Option<String>) -> Self {
        Self { job_id }
    }
}

impl ResourceManager for LocalManager {
    fn name(&self) -> &'static str {
        "local"
    }

    fn job_id(&self) -> Option<String> {
        self.job_id.clone()
    }

    fn job_nodes(&self) -> Result<Option<NodeSet>, ResourceManagerError> {
        match nix::unistd::gethostname() {
            Ok(hostname) => Ok(Some(
                [hostname.to_string_lossy().into_owned()].into_iter().collect(),
            )),
            Err(error) => {
                error!(error = ?error, "Failed to retrieve hostname for the local node set: {error}");

                Err(error.into())
            }
        }
    }

    fn down_nodes(&self, _nodes: &NodeSet) -> Result<NodeSet, ResourceManagerError> {
        Ok(NodeSet::new())
    }

    fn kill_job_step(&self, step: &str) -> Result<(), ResourceManagerError> {
        let pid = step
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|pid| *pid > 0)
            .ok_or_else(|| ResourceManagerError::InvalidJobStep(step.to_string()))?;

        info!(pid = pid, "Sending SIGKILL to local job step");
        kill(Pid::from_raw(pid), Signal::SIGKILL)?;

        Ok(())
    }
}
