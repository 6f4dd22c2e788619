//! In-memory stand-ins for the external collaborators, recording every call.

use crate::{
    flush::{DatasetId, DatasetIndex, FlushError, FlushState, Sample},
    liveness::NodeProbe,
    nodeset::NodeSet,
    resmgr::{ResourceManager, ResourceManagerError},
    scavenge::{ScavengeEngine, ScavengeError, ScavengeRequest},
};
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet, VecDeque},
};

fn nodes(list: &str) -> NodeSet {
    list.parse().unwrap()
}

#[derive(Debug, Clone)]
pub struct FakeDataset {
    pub name: Option<String>,
    pub needs_flush: bool,
    pub output: bool,
    pub checkpoint: bool,
}

impl Default for FakeDataset {
    fn default() -> Self {
        Self {
            name: None,
            needs_flush: true,
            output: false,
            checkpoint: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeFlushState {
    datasets: BTreeMap<DatasetId, FakeDataset>,
    samples: RefCell<VecDeque<Sample>>,
    fail_listing: bool,
    fail_needs_flush: BTreeSet<DatasetId>,
    ignore_before: bool,
    checkpoint_queries: RefCell<Vec<Option<DatasetId>>>,
    name_queries: RefCell<Vec<DatasetId>>,
}

impl FakeFlushState {
    pub fn new() -> Self {
        Self::default()
    }

    fn dataset(&mut self, id: u64) -> &mut FakeDataset {
        let dataset = self.datasets.entry(DatasetId(id)).or_default();
        dataset.name.get_or_insert_with(|| format!("ckpt.{id}"));
        dataset
    }

    /// output set needing a flush
    pub fn output(mut self, id: u64) -> Self {
        self.dataset(id).output = true;
        self
    }

    /// checkpoint needing a flush
    pub fn checkpoint(mut self, id: u64) -> Self {
        self.dataset(id).checkpoint = true;
        self
    }

    pub fn flushed(mut self, id: u64) -> Self {
        self.dataset(id).needs_flush = false;
        self
    }

    pub fn nameless(mut self, id: u64) -> Self {
        self.dataset(id).name = None;
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn failing_needs_flush(mut self, id: u64) -> Self {
        self.fail_needs_flush.insert(DatasetId(id));
        self
    }

    /// list every checkpoint, whatever `before` asks for
    pub fn ignoring_before(mut self) -> Self {
        self.ignore_before = true;
        self
    }

    pub fn with_samples(self, samples: Vec<Sample>) -> Self {
        *self.samples.borrow_mut() = samples.into();
        self
    }

    pub fn checkpoint_queries(&self) -> Vec<Option<DatasetId>> {
        self.checkpoint_queries.borrow().clone()
    }

    pub fn name_queries(&self) -> Vec<DatasetId> {
        self.name_queries.borrow().clone()
    }
}

impl FlushState for FakeFlushState {
    fn output_dataset_ids(&self) -> Result<Vec<DatasetId>, FlushError> {
        if self.fail_listing {
            return Err(FlushError::InvalidId("<listing>".into()));
        }

        Ok(self
            .datasets
            .iter()
            .filter(|(_, dataset)| dataset.output)
            .map(|(id, _)| *id)
            .collect())
    }

    fn needs_flush(&self, id: DatasetId) -> Result<bool, FlushError> {
        if self.fail_needs_flush.contains(&id) {
            return Err(FlushError::InvalidId(id.to_string()));
        }

        Ok(self
            .datasets
            .get(&id)
            .map_or(false, |dataset| dataset.needs_flush))
    }

    fn dataset_name(&self, id: DatasetId) -> Result<String, FlushError> {
        self.name_queries.borrow_mut().push(id);

        self.datasets
            .get(&id)
            .and_then(|dataset| dataset.name.clone())
            .ok_or(FlushError::NameNotFound(id))
    }

    fn checkpoint_dataset_ids(
        &self,
        before: Option<DatasetId>,
    ) -> Result<Vec<DatasetId>, FlushError> {
        self.checkpoint_queries.borrow_mut().push(before);
        let before = before.filter(|_| !self.ignore_before);

        Ok(self
            .datasets
            .iter()
            .rev()
            .filter(|(id, dataset)| dataset.checkpoint && before.map_or(true, |b| **id < b))
            .map(|(id, _)| *id)
            .collect())
    }

    fn latest_sample(&self) -> Result<Sample, FlushError> {
        Ok(self.samples.borrow_mut().pop_front().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct FakeIndex {
    complete: BTreeSet<DatasetId>,
    fail_set_current: bool,
    builds: RefCell<Vec<DatasetId>>,
    current: RefCell<Vec<String>>,
}

impl FakeIndex {
    /// index where exactly `ids` verify as complete
    pub fn complete(ids: &[u64]) -> Self {
        Self {
            complete: ids.iter().copied().map(DatasetId).collect(),
            ..Self::default()
        }
    }

    pub fn failing_set_current(mut self) -> Self {
        self.fail_set_current = true;
        self
    }

    pub fn builds(&self) -> Vec<DatasetId> {
        self.builds.borrow().clone()
    }

    /// every name the current marker was set to
    pub fn current(&self) -> Vec<String> {
        self.current.borrow().clone()
    }
}

impl DatasetIndex for FakeIndex {
    fn build(&self, id: DatasetId) -> Result<bool, FlushError> {
        self.builds.borrow_mut().push(id);

        Ok(self.complete.contains(&id))
    }

    fn set_current(&self, name: &str) -> Result<(), FlushError> {
        if self.fail_set_current {
            return Err(FlushError::SetCurrent(name.to_string()));
        }

        self.current.borrow_mut().push(name.to_string());

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeScavenger {
    failing: BTreeSet<DatasetId>,
    calls: RefCell<Vec<DatasetId>>,
    last_request: RefCell<Option<(NodeSet, NodeSet, NodeSet)>>,
}

impl FakeScavenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// transfers of `ids` report failure
    pub fn failing(ids: &[u64]) -> Self {
        Self {
            failing: ids.iter().copied().map(DatasetId).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<DatasetId> {
        self.calls.borrow().clone()
    }

    /// (job, up, down) node sets of the last request
    pub fn last_request(&self) -> Option<(NodeSet, NodeSet, NodeSet)> {
        self.last_request.borrow().clone()
    }
}

impl ScavengeEngine for FakeScavenger {
    fn scavenge(&self, request: &ScavengeRequest<'_>) -> Result<(), ScavengeError> {
        self.calls.borrow_mut().push(request.id);
        *self.last_request.borrow_mut() = Some((
            request.job_nodes.clone(),
            request.up.clone(),
            request.down.clone(),
        ));

        if self.failing.contains(&request.id) {
            Err(ScavengeError::Failed {
                id: request.id,
                code: Some(1),
            })
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeResourceManager {
    nodes: NodeSet,
    down: NodeSet,
    fail_down: bool,
    fail_kill: bool,
    kills: RefCell<Vec<String>>,
    job_node_queries: Cell<usize>,
}

impl FakeResourceManager {
    pub fn new(job_nodes: &str) -> Self {
        Self {
            nodes: nodes(job_nodes),
            ..Self::default()
        }
    }

    pub fn with_down(mut self, down: &str) -> Self {
        self.down = nodes(down);
        self
    }

    pub fn failing_down(mut self) -> Self {
        self.fail_down = true;
        self
    }

    pub fn failing_kill(mut self) -> Self {
        self.fail_kill = true;
        self
    }

    pub fn kills(&self) -> Vec<String> {
        self.kills.borrow().clone()
    }

    pub fn job_node_queries(&self) -> usize {
        self.job_node_queries.get()
    }
}

impl ResourceManager for FakeResourceManager {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn job_id(&self) -> Option<String> {
        Some("1234".into())
    }

    fn job_nodes(&self) -> Result<Option<NodeSet>, ResourceManagerError> {
        self.job_node_queries.set(self.job_node_queries.get() + 1);

        Ok(Some(self.nodes.clone()))
    }

    fn down_nodes(&self, _nodes: &NodeSet) -> Result<NodeSet, ResourceManagerError> {
        if self.fail_down {
            return Err(ResourceManagerError::QueryFailed("sinfo".into()));
        }

        Ok(self.down.clone())
    }

    fn kill_job_step(&self, step: &str) -> Result<(), ResourceManagerError> {
        self.kills.borrow_mut().push(step.to_string());

        if self.fail_kill {
            Err(ResourceManagerError::KillFailed {
                step: step.to_string(),
                code: Some(1),
            })
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeProbe {
    unreachable: NodeSet,
    full: NodeSet,
    probed: RefCell<Vec<NodeSet>>,
}

impl FakeProbe {
    /// every node answers and has enough capacity
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn new(unreachable: &str, full: &str) -> Self {
        Self {
            unreachable: nodes(unreachable),
            full: nodes(full),
            ..Self::default()
        }
    }

    /// node sets handed to the ping probe, then the capacity probe
    pub fn probed(&self) -> Vec<NodeSet> {
        self.probed.borrow().clone()
    }
}

impl NodeProbe for FakeProbe {
    fn unreachable(&self, nodes: &NodeSet) -> NodeSet {
        self.probed.borrow_mut().push(nodes.clone());

        nodes.intersection(&self.unreachable)
    }

    fn capacity_exceeded(&self, nodes: &NodeSet) -> NodeSet {
        self.probed.borrow_mut().push(nodes.clone());

        nodes.intersection(&self.full)
    }
}
