use std::collections::BTreeMap;
use uuid::Uuid;

use crate::analyze::{Routing, ShardLocation};
use crate::config::ExecutionSettings;

/// Per-job planning state: ids for phases and for the shard readers a
/// fetch can later address.
#[derive(Debug, Clone)]
pub struct PlannerContext {
    job_id: Uuid,
    settings: ExecutionSettings,
    next_phase_id: u32,
    next_reader_id: u32,
    reader_nodes: BTreeMap<u32, String>,
    reader_shards: BTreeMap<u32, ShardLocation>,
}

impl PlannerContext {
    pub fn new(settings: ExecutionSettings) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            settings,
            next_phase_id: 0,
            next_reader_id: 0,
            reader_nodes: BTreeMap::new(),
            reader_shards: BTreeMap::new(),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Id of the coordinating node
    pub fn local_node_id(&self) -> &str {
        &self.settings.node_id
    }

    pub fn next_phase_id(&mut self) -> u32 {
        let id = self.next_phase_id;
        self.next_phase_id += 1;
        id
    }

    /// Assign a reader id to every shard of `routing` that has none yet
    pub fn allocate_readers(&mut self, routing: &Routing) {
        for location in routing.all_shards() {
            if self.reader_id_for(&location).is_some() {
                continue;
            }
            let reader_id = self.next_reader_id;
            self.next_reader_id += 1;
            self.reader_nodes.insert(reader_id, location.node.clone());
            self.reader_shards.insert(reader_id, location);
        }
    }

    pub fn reader_id_for(&self, location: &ShardLocation) -> Option<u32> {
        self.reader_shards
            .iter()
            .find(|(_, shard)| *shard == location)
            .map(|(id, _)| *id)
    }

    pub fn reader_nodes(&self) -> &BTreeMap<u32, String> {
        &self.reader_nodes
    }

    pub fn reader_shards(&self) -> &BTreeMap<u32, ShardLocation> {
        &self.reader_shards
    }
}

/// What a consumer needs to know while planning one relation
#[derive(Debug)]
pub struct ConsumerContext {
    planner: PlannerContext,
    root: bool,
}

impl ConsumerContext {
    pub fn new(planner: PlannerContext) -> Self {
        Self {
            planner,
            root: true,
        }
    }

    /// Context for planning a relation nested inside another one
    pub fn for_subquery(planner: PlannerContext) -> Self {
        Self {
            planner,
            root: false,
        }
    }

    /// Whether the relation being planned is the outermost one
    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn planner_context(&self) -> &PlannerContext {
        &self.planner
    }

    pub fn planner_context_mut(&mut self) -> &mut PlannerContext {
        &mut self.planner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_allocation_is_stable() {
        let mut routing = Routing::new();
        routing.add("n1", "t", 0);
        routing.add("n1", "t", 1);
        routing.add("n2", "t", 2);

        let mut ctx = PlannerContext::new(ExecutionSettings::default());
        ctx.allocate_readers(&routing);
        ctx.allocate_readers(&routing);

        assert_eq!(ctx.reader_nodes().len(), 3);
        assert_eq!(ctx.reader_nodes().get(&2), Some(&"n2".to_string()));
        let location = ShardLocation {
            node: "n1".to_string(),
            index: "t".to_string(),
            shard: 1,
        };
        assert_eq!(ctx.reader_id_for(&location), Some(1));
    }

    #[test]
    fn test_phase_ids_increment() {
        let mut ctx = PlannerContext::new(ExecutionSettings::default());
        assert_eq!(ctx.next_phase_id(), 0);
        assert_eq!(ctx.next_phase_id(), 1);
    }
}
