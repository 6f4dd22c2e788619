use super::{ResourceManager, ResourceManagerError};
use crate::{command::ExternalCommand, nodeset::NodeSet};
use std::env;
use tracing::debug;

/// Adapter for SLURM allocations (sinfo/scancel)
#[derive(Debug, Clone)]
pub struct SlurmManager {
    job_id: Option<String>,
    nodelist: Option<String>,
    verbose: bool,
}

impl SlurmManager {
    pub fn new(job_id: Option<String>, nodelist: Option<String>, verbose: bool) -> Self {
        Self {
            job_id,
            nodelist,
            verbose,
        }
    }

    pub fn from_env(verbose: bool) -> Self {
        Self::new(
            env::var("SLURM_JOBID").ok(),
            env::var("SLURM_NODELIST").ok(),
            verbose,
        )
    }
}

impl ResourceManager for SlurmManager {
    fn name(&self) -> &'static str {
        "SLURM"
    }

    fn job_id(&self) -> Option<String> {
        self.job_id.clone()
    }

    fn job_nodes(&self) -> Result<Option<NodeSet>, ResourceManagerError> {
        self.nodelist
            .as_deref()
            .map(|nodes| nodes.parse().map_err(ResourceManagerError::from))
            .transpose()
    }

    fn down_nodes(&self, nodes: &NodeSet) -> Result<NodeSet, ResourceManagerError> {
        if nodes.is_empty() {
            return Ok(NodeSet::new());
        }

        let command = ExternalCommand::new("sinfo")
            .args(["-ho", "%N", "-t", "down", "-n"])
            .arg(nodes.to_string())
            .verbose(self.verbose);
        let output = command.run()?;

        if !output.success {
            return Err(ResourceManagerError::QueryFailed(command.command_line()));
        }

        let down: NodeSet = output.stdout_trimmed().parse()?;
        debug!(down = %down, "sinfo reported down nodes");

        Ok(down.intersection(nodes))
    }

    fn kill_job_step(&self, step: &str) -> Result<(), ResourceManagerError> {
        let output = ExternalCommand::new("scancel")
            .arg(step)
            .verbose(self.verbose)
            .run()?;

        if output.success {
            Ok(())
        } else {
            Err(ResourceManagerError::KillFailed {
                step: step.to_string(),
                code: output.code,
            })
        }
    }
}
