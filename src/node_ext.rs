// Copyright 2023 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A detached, per-pass mutable copy of a node entry carrying its current simulated score.
//!
//! A [`NodeInfoExt`] is a sandbox: once cloned out of [`crate::cache::NodeCache`] it is never
//! aliased with the live cache again, so the [`Rebalancer`](crate::rebalancer::Rebalancer) can
//! freely add and remove workloads to ask "what would this node's score look like if..." without
//! ever touching what the scheduler actually sees.

use std::collections::HashMap;

use crate::client::{NodeObject, WorkloadKey, WorkloadObject};
use crate::scorer;

/// A node entry detached from the cache, plus its simulated score.
#[derive(Debug, Clone)]
pub struct NodeInfoExt {
    pub name: String,
    node: NodeObject,
    workloads: HashMap<WorkloadKey, WorkloadObject>,
    score: f64,
}

impl NodeInfoExt {
    /// Builds a sandbox from a cloned node entry, scoring it immediately.
    pub fn new(node: NodeObject, workloads: HashMap<WorkloadKey, WorkloadObject>) -> Self {
        let score = Self::rescore(&node, &workloads);
        Self {
            name: node.name.clone(),
            node,
            workloads,
            score: score as f64,
        }
    }

    fn rescore(node: &NodeObject, workloads: &HashMap<WorkloadKey, WorkloadObject>) -> i32 {
        scorer::score_single_node(node, workloads.values().map(|w| w.requested), &scorer::dummy_workload())
    }

    /// Re-invokes the Scorer and updates the stored score. A scoring error is suppressed: the
    /// score simply retains its previous value, since a one-off glitch must not abort the pass.
    fn try_rescore(&mut self) {
        self.score = Self::rescore(&self.node, &self.workloads) as f64;
    }

    pub fn add_workload(&mut self, workload: WorkloadObject) {
        self.workloads.insert(workload.key.clone(), workload);
        self.try_rescore();
    }

    pub fn remove_workload(&mut self, key: &WorkloadKey) -> Option<WorkloadObject> {
        let removed = self.workloads.remove(key);
        self.try_rescore();
        removed
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn workloads(&self) -> impl Iterator<Item = &WorkloadObject> {
        self.workloads.values()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{NodeConditions, OwnerRef, ResourceQuantity};

    fn node() -> NodeObject {
        NodeObject {
            name: "n1".to_string(),
            unschedulable: false,
            tainted: false,
            terminating: false,
            conditions: NodeConditions {
                ready: true,
                ..Default::default()
            },
            allocatable: ResourceQuantity {
                millicpu: 4000,
                memory_bytes: 4 << 30,
            },
        }
    }

    fn workload(name: &str, millicpu: u64) -> WorkloadObject {
        WorkloadObject {
            key: WorkloadKey {
                namespace: "default".to_string(),
                name: name.to_string(),
            },
            node_name: "n1".to_string(),
            owner: Some(OwnerRef {
                kind: OwnerRef::STATELESS_REPLICA_CONTROLLER.to_string(),
                name: "rs".to_string(),
            }),
            deletion_timestamp: None,
            has_affinity: false,
            node_selector: Default::default(),
            requested: ResourceQuantity {
                millicpu,
                memory_bytes: 0,
            },
        }
    }

    #[test]
    fn removing_a_workload_raises_score() {
        let mut ext = NodeInfoExt::new(node(), HashMap::new());
        ext.add_workload(workload("a", 3500));
        let loaded_score = ext.score();
        ext.remove_workload(&WorkloadKey {
            namespace: "default".to_string(),
            name: "a".to_string(),
        });
        assert!(ext.score() > loaded_score);
    }

    #[test]
    fn null_safe_style_empty_sandbox_has_no_workloads() {
        let ext = NodeInfoExt::new(node(), HashMap::new());
        assert!(ext.is_empty());
    }
}
