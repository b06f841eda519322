//! Final execution ordering: depth-first post-order over producers, rooted
//! at the externally-named model outputs. Ops not reachable from any output
//! are dropped.

use std::collections::HashSet;

use tracing::debug;

use super::Transformer;
use crate::graph::index::ProducerRef;
use crate::graph::{OperatorDef, OUTPUT_NODE_PREFIX};
use crate::{ChiselError, ChiselResult};

impl Transformer {
    pub(super) fn sort_by_execution(&mut self) -> ChiselResult<bool> {
        debug!("sort by execution");
        let mut visited: HashSet<usize> = HashSet::new();
        let mut order: Vec<usize> = Vec::new();

        for name in &self.option.output_nodes {
            let tensor = format!("{}_{}", OUTPUT_NODE_PREFIX, name);
            let producer = self
                .index
                .producer
                .get(&tensor)
                .copied()
                .ok_or_else(|| ChiselError::MissingOutput(tensor.clone()))?;
            if let ProducerRef::Node(idx) = producer {
                if !visited.contains(&idx) {
                    self.sort_dfs(idx, &mut visited, &mut order);
                }
            }
        }

        let mut slots: Vec<Option<OperatorDef>> = self.model.op.drain(..).map(Some).collect();
        self.model.op = order.iter().filter_map(|&idx| slots[idx].take()).collect();
        Ok(false)
    }

    fn sort_dfs(&self, idx: usize, visited: &mut HashSet<usize>, order: &mut Vec<usize>) {
        visited.insert(idx);
        for input in &self.model.op[idx].input {
            // Constants, boundary names and synthesized inputs have no real
            // producer and terminate the walk.
            if let Some(ProducerRef::Node(producer)) = self.index.producer.get(input) {
                if !visited.contains(producer) {
                    self.sort_dfs(*producer, visited, order);
                }
            }
        }
        order.push(idx);
    }
}
