use super::{ResourceManager, ResourceManagerError};
use crate::{command::ExternalCommand, nodeset::NodeSet};
use std::env;
use tracing::{debug, warn};

/// Adapter for PBS allocations on Cray systems running ALPS (aprun/xtprocadmin/apkill)
#[derive(Debug, Clone)]
pub struct PbsAlpsManager {
    job_id: Option<String>,
    num_nodes: Option<String>,
    verbose: bool,
}

impl PbsAlpsManager {
    pub fn new(job_id: Option<String>, num_nodes: Option<String>, verbose: bool) -> Self {
        Self {
            job_id,
            num_nodes,
            verbose,
        }
    }

    pub fn from_env(verbose: bool) -> Self {
        Self::new(
            env::var("PBS_JOBID").ok(),
            env::var("PBS_NUM_NODES").ok(),
            verbose,
        )
    }
}

/// node ids printed by `aprun ... cat /proc/cray_xt/nid`, minus the trailing aprun summary
pub fn parse_nid_output(output: &str) -> NodeSet {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("Application"))
        .collect()
}

/// `xtprocadmin -n <node>` prints a header and one row, the fifth column holds the state
pub fn is_down_in_xtprocadmin(output: &str) -> bool {
    output
        .lines()
        .nth(1)
        .and_then(|row| row.split_whitespace().nth(4))
        .map_or(false, |state| state.contains("down"))
}

impl ResourceManager for PbsAlpsManager {
    fn name(&self) -> &'static str {
        "PBSALPS"
    }

    fn job_id(&self) -> Option<String> {
        self.job_id.clone()
    }

    fn job_nodes(&self) -> Result<Option<NodeSet>, ResourceManagerError> {
        let num_nodes = match &self.num_nodes {
            Some(num_nodes) => num_nodes,
            None => return Ok(None),
        };

        let output = ExternalCommand::new("aprun")
            .args(["-n", num_nodes.as_str(), "-N", "1", "cat", "/proc/cray_xt/nid"])
            .verbose(self.verbose)
            .run()?;
        let nodes = parse_nid_output(&output.stdout);

        Ok(Some(nodes).filter(|nodes| !nodes.is_empty()))
    }

    fn down_nodes(&self, nodes: &NodeSet) -> Result<NodeSet, ResourceManagerError> {
        let mut down = NodeSet::new();

        for node in nodes {
            let output = ExternalCommand::new("xtprocadmin")
                .args(["-n", node.as_str()])
                .verbose(self.verbose)
                .run()?;

            if !output.success {
                warn!(node = %node, "xtprocadmin failed to report the node state");
            }

            if is_down_in_xtprocadmin(&output.stdout) {
                debug!(node = %node, "xtprocadmin reports node as down");
                down.insert(node.clone());
            }
        }

        Ok(down)
    }

    fn kill_job_step(&self, step: &str) -> Result<(), ResourceManagerError> {
        let output = ExternalCommand::new("apkill")
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
