use crate::{
    command::{CommandError, ExternalCommand},
    nodeset::NodeSet,
    resmgr::ResourceManager,
};
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, warn};


/// upper bound for a single remote capacity check
const CAPACITY_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a node of the allocation can't be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DownReason {
    ResourceManager,
    Excluded,
    FailedPing,
    Capacity,
}

impl fmt::Display for DownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ResourceManager => "Reported down by resource manager",
            Self::Excluded => "User excluded via SCR_EXCLUDE_NODES",
            Self::FailedPing => "Failed to ping",
            Self::Capacity => "Failed capacity check",
        })
    }
}

/// Health checks run against the nodes the resource manager still reports as up
pub trait NodeProbe {
    fn unreachable(&self, nodes: &NodeSet) -> NodeSet;
    fn capacity_exceeded(&self, nodes: &NodeSet) -> NodeSet;
}

/// Up/down split of a job allocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeLiveness {
    pub up: NodeSet,
    pub down: NodeSet,
    pub reasons: BTreeMap<String, DownReason>,
}

impl NodeLiveness {
    /// `down` is always a subset of `job` and `up = job - down`
    pub fn assess(
        job: &NodeSet,
        resource_manager: &dyn ResourceManager,
        probe: &dyn NodeProbe,
        excluded: &NodeSet,
    ) -> Self {
        let mut reasons = BTreeMap::new();

        match resource_manager.down_nodes(job) {
            Ok(down) => mark(&mut reasons, job, &down, DownReason::ResourceManager),
            Err(error) => warn!(
                "Failed to ask {} for down nodes, assuming none: {error}",
                resource_manager.name()
            ),
        }
        mark(&mut reasons, job, excluded, DownReason::Excluded);

        // only probe nodes which are not already known to be down
        let unreachable = probe.unreachable(&remaining(job, &reasons));
        mark(&mut reasons, job, &unreachable, DownReason::FailedPing);

        let full = probe.capacity_exceeded(&remaining(job, &reasons));
        mark(&mut reasons, job, &full, DownReason::Capacity);

        let down: NodeSet = reasons.keys().cloned().collect();
        let up = job.difference(&down);

        Self { up, down, reasons }
    }

    pub fn log(&self) {
        info!("UPNODES:   {}", self.up);

        if !self.down.is_empty() {
            info!("DOWNNODES: {}", self.down);
        }

        for (node, reason) in &self.reasons {
            debug!(node = %node, "{reason}");
        }
    }
}

/// record `reason` for every job node in `nodes`, the first reason found for a node sticks
fn mark(
    reasons: &mut BTreeMap<String, DownReason>,
    job: &NodeSet,
    nodes: &NodeSet,
    reason: DownReason,
) {
    for node in nodes.intersection(job).iter() {
        reasons.entry(node.clone()).or_insert(reason);
    }
}

fn remaining(job: &NodeSet, reasons: &BTreeMap<String, DownReason>) -> NodeSet {
    job.iter()
        .filter(|node| !reasons.contains_key(node.as_str()))
        .cloned()
        .collect()
}

/// `NodeProbe` pinging nodes and running `scr_check_node` on them through pdsh
#[derive(Debug, Clone)]
pub struct CommandProbe {
    ping: PathBuf,
    pdsh: PathBuf,
    check_node: PathBuf,
    control_dir: PathBuf,
    ping_timeout: Duration,
    check_capacity: bool,
    verbose: bool,
}

impl CommandProbe {
    pub fn new(
        bindir: &Path,
        control_dir: &Path,
        ping_timeout: Duration,
        check_capacity: bool,
        verbose: bool,
    ) -> Self {
        Self {
            ping: PathBuf::from("ping"),
            pdsh: PathBuf::from("pdsh"),
            check_node: bindir.join("scr_check_node"),
            control_dir: control_dir.to_path_buf(),
            ping_timeout,
            check_capacity,
            verbose,
        }
    }

    /// use other `ping` and `pdsh` executables than the ones found on `PATH`
    pub fn with_programs(mut self, ping: impl Into<PathBuf>, pdsh: impl Into<PathBuf>) -> Self {
        self.ping = ping.into();
        self.pdsh = pdsh.into();
        self
    }

    /// run `command` for every node, collecting the nodes where it failed
    ///
    /// A tool that can't be spawned at all disables the check instead of failing every node.
    fn failing_nodes<F>(
        &self,
        nodes: &NodeSet,
        check: &str,
        timeout: Duration,
        command: F,
    ) -> NodeSet
    where
        F: Fn(&str) -> ExternalCommand,
    {
        let mut failed = NodeSet::new();

        for node in nodes {
            match command(node.as_str()).verbose(self.verbose).run_with_timeout(timeout) {
                Ok(output) if output.success => {}
                Ok(_) | Err(CommandError::Timeout { .. }) => {
                    debug!(node = %node, "{check} failed");
                    failed.insert(node.clone());
                }
                Err(error @ CommandError::Spawn { .. }) => {
                    warn!("Skipping {check} for all nodes: {error}");
                    return NodeSet::new();
                }
                Err(error) => {
                    warn!(node = %node, "{check} could not be completed: {error}");
                    failed.insert(node.clone());
                }
            }
        }

        failed
    }
}

impl NodeProbe for CommandProbe {
    fn unreachable(&self, nodes: &NodeSet) -> NodeSet {
        // ping -w takes whole seconds, at least one
        let deadline = self.ping_timeout.max(Duration::from_secs(1));
        let seconds = deadline.as_secs().to_string();

        self.failing_nodes(nodes, "ping", deadline * 2, |node| {
            ExternalCommand::new(&self.ping)
                .args(["-c", "1", "-w", seconds.as_str()])
                .arg(node)
        })
    }

    fn capacity_exceeded(&self, nodes: &NodeSet) -> NodeSet {
        if !self.check_capacity {
            return NodeSet::new();
        }

        self.failing_nodes(nodes, "capacity check", CAPACITY_CHECK_TIMEOUT, |node| {
            // -S makes pdsh exit with the remote exit code instead of 0
            ExternalCommand::new(&self.pdsh)
                .args(["-S", "-w", node])
                .arg(&self.check_node)
                .arg("--cntl")
                .arg(&self.control_dir)
        })
    }
}
