mod local;
mod pbsalps;
mod slurm;

pub use local::LocalManager;
pub use pbsalps::PbsAlpsManager;
pub use slurm::SlurmManager;

use crate::{
    command::CommandError,
    config::{ConfigErrors, ScrConfig},
    nodeset::{NodeSet, NodeSetError},
};
use thiserror::Error;

#[cfg(test)]
mod resmgr_test;

#[derive(Error, Debug)]
pub enum ResourceManagerError {
    #[error("Failed to run resource manager command")]
    Command(#[from] CommandError),
    #[error("Resource manager reported an invalid node list")]
    InvalidNodeSet(#[from] NodeSetError),
    #[error("Query `{0}` failed")]
    QueryFailed(String),
    #[error("Failed to kill job step {step} (exit code {code:?})")]
    KillFailed { step: String, code: Option<i32> },
    #[error("Job step id `{0}` is not valid for this resource manager")]
    InvalidJobStep(String),
    #[error("System call failed")]
    Sys(#[from] nix::errno::Errno),
}

/// Scheduler specific view on the job allocation
pub trait ResourceManager {
    fn name(&self) -> &'static str;
    fn job_id(&self) -> Option<String>;
    /// all nodes of the allocation, `None` if the scheduler doesn't expose them
    fn job_nodes(&self) -> Result<Option<NodeSet>, ResourceManagerError>;
    /// nodes of `nodes` the scheduler considers down
    fn down_nodes(&self, nodes: &NodeSet) -> Result<NodeSet, ResourceManagerError>;
    fn kill_job_step(&self, step: &str) -> Result<(), ResourceManagerError>;
}

/// All supported resource managers, selected by name with `ResourceManagers::load`
#[derive(Clone, Debug)]
pub enum ResourceManagers {
    Slurm(SlurmManager),
    PbsAlps(PbsAlpsManager),
    Local(LocalManager),
}

impl ResourceManagers {
    pub fn load(config: &ScrConfig, verbose: bool) -> Result<Self, ConfigErrors> {
        match config.resource_manager_name() {
            "slurm" => Ok(Self::Slurm(SlurmManager::from_env(verbose))),
            "pbsalps" | "pbs" | "alps" => Ok(Self::PbsAlps(PbsAlpsManager::from_env(verbose))),
            "local" | "none" => Ok(Self::Local(LocalManager::new(config.job_id.clone()))),
            other => Err(ConfigErrors::UnsupportedResourceManager(other.to_string())),
        }
    }

    fn inner(&self) -> &dyn ResourceManager {
        match self {
            Self::Slurm(manager) => manager,
            Self::PbsAlps(manager) => manager,
            Self::Local(manager) => manager,
        }
    }
}

impl ResourceManager for ResourceManagers {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn job_id(&self) -> Option<String> {
        self.inner().job_id()
    }

    fn job_nodes(&self) -> Result<Option<NodeSet>, ResourceManagerError> {
        self.inner().job_nodes()
    }

    fn down_nodes(&self, nodes: &NodeSet) -> Result<NodeSet, ResourceManagerError> {
        self.inner().down_nodes(nodes)
    }

    fn kill_job_step(&self, step: &str) -> Result<(), ResourceManagerError> {
        self.inner().kill_job_step(step)
    }
}
