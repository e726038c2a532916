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

//! A thread-safe mirror of the orchestrator's view of nodes and their assigned workloads.
//!
//! [`NodeCache`] is driven entirely by [`crate::client::WatchEvent`] callbacks and is the single
//! source of truth the rest of this crate reads from. Every public method takes and releases the
//! internal lock itself; callers never see a guard, which keeps the critical sections short and
//! makes it impossible to accidentally hold the lock across an `.await` (see
//! `crate::hummock::compaction_scheduler::CompactionRequestChannel` in the codebase this is
//! modeled on for the same pattern with `parking_lot::Mutex`).

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::client::{NodeName, NodeObject, WorkloadKey, WorkloadObject};
use crate::node_ext::NodeInfoExt;
use crate::scorer::{self, HostPriorityList};

#[derive(Debug, Default, Clone)]
struct NodeEntry {
    /// Absent when this entry exists only because a workload references the node by name
    /// before the node object itself has been observed.
    node: Option<NodeObject>,
    workloads: HashMap<WorkloadKey, WorkloadObject>,
}

#[derive(Debug, Default)]
struct NodeCacheInner {
    nodes: HashMap<NodeName, NodeEntry>,
    /// Reverse index from workload key to its currently-assigned node, used to detect
    /// reassignment (a node-name change between an old and new observation of the same
    /// workload) without requiring callers to pass the previous state explicitly.
    workload_index: HashMap<WorkloadKey, NodeName>,
}

/// Thread-safe mirror of nodes and their assigned workloads.
#[derive(Default)]
pub struct NodeCache {
    inner: Mutex<NodeCacheInner>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: creates the entry if absent, attaches the node object. No-op if the name is
    /// empty.
    pub fn observe_node_upsert(&self, node: NodeObject) {
        if node.name.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.nodes.entry(node.name.clone()).or_default().node = Some(node);
    }

    /// Removes the named entry. Workloads still indexed under it become orphaned and are only
    /// pruned when their own delete event arrives.
    pub fn observe_node_delete(&self, name: &str) {
        let mut inner = self.inner.lock();
        inner.nodes.remove(name);
    }

    /// If the workload is unassigned, it is ignored. If this is the first time this workload key
    /// has been observed assigned, it is added to its node's workload set (creating the node
    /// entry if the node object hasn't arrived yet). If the workload is already tracked and its
    /// node name is unchanged, the stored copy is replaced. If its node name has changed
    /// (reassignment), the update is dropped entirely; consistency is restored by the next
    /// bootstrap or by a delete+re-add pair.
    pub fn observe_workload_upsert(&self, workload: WorkloadObject) {
        if !workload.is_assigned() {
            return;
        }
        let mut inner = self.inner.lock();
        match inner.workload_index.get(&workload.key).cloned() {
            None => {
                inner.workload_index.insert(workload.key.clone(), workload.node_name.clone());
                inner
                    .nodes
                    .entry(workload.node_name.clone())
                    .or_default()
                    .workloads
                    .insert(workload.key.clone(), workload);
            }
            Some(ref current_node) if *current_node == workload.node_name => {
                if let Some(entry) = inner.nodes.get_mut(current_node) {
                    entry.workloads.insert(workload.key.clone(), workload);
                }
            }
            Some(_) => {
                // Reassignment: intentionally dropped. See module docs.
            }
        }
    }

    /// Removes the workload from its node's workload set, if present.
    pub fn observe_workload_delete(&self, key: &WorkloadKey) {
        let mut inner = self.inner.lock();
        if let Some(node_name) = inner.workload_index.remove(key) {
            if let Some(entry) = inner.nodes.get_mut(&node_name) {
                entry.workloads.remove(key);
            }
        }
    }

    /// Replays a listed snapshot of all assigned workloads through [`Self::observe_workload_upsert`].
    /// Safe to call after the watch stream's initial sync, and safe to call more than once:
    /// upsert is idempotent, so bootstrapping twice (or bootstrapping then replaying the same
    /// live events) converges to the same state.
    pub fn bootstrap_from_snapshot(&self, workloads: Vec<WorkloadObject>) {
        for workload in workloads {
            self.observe_workload_upsert(workload);
        }
    }

    /// Names of nodes currently under memory, disk, or PID pressure.
    pub fn filter_res_pressure(&self) -> Vec<NodeName> {
        let inner = self.inner.lock();
        inner
            .nodes
            .values()
            .filter_map(|entry| entry.node.as_ref())
            .filter(|node| node.has_res_pressure())
            .map(|node| node.name.clone())
            .collect()
    }

    /// Deep-copies the named node entry under the lock, then scores the copy *after* releasing
    /// it: scoring never happens on the critical path. Returns `None` for an unknown node, or for
    /// one whose node object hasn't arrived yet (workload-only entry).
    pub fn clone_node_ext(&self, name: &str) -> Option<NodeInfoExt> {
        let (node, workloads) = {
            let inner = self.inner.lock();
            let entry = inner.nodes.get(name)?;
            (entry.node.clone()?, entry.workloads.clone())
        };
        Some(NodeInfoExt::new(node, workloads))
    }

    /// Scores every entry whose node object passes [`NodeObject::is_working`]. Ordering is not
    /// meaningful.
    pub fn score_all(&self) -> HostPriorityList {
        let inner = self.inner.lock();
        let dummy = scorer::dummy_workload();
        let working: Vec<(&NodeObject, Vec<WorkloadObject>)> = inner
            .nodes
            .values()
            .filter_map(|entry| {
                let node = entry.node.as_ref()?;
                node.is_working().then(|| (node, entry.workloads.values().cloned().collect()))
            })
            .collect();
        scorer::prioritize_nodes(&dummy, working.iter().map(|(node, workloads)| (*node, workloads.as_slice())))
    }

    #[cfg(test)]
    pub(crate) fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    #[cfg(test)]
    fn workload_count(&self, name: &str) -> usize {
        self.inner.lock().nodes.get(name).map(|e| e.workloads.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::client::{NodeConditions, OwnerRef, ResourceQuantity};

    fn node(name: &str, ready: bool) -> NodeObject {
        NodeObject {
            name: name.to_string(),
            unschedulable: false,
            tainted: false,
            terminating: false,
            conditions: NodeConditions {
                ready,
                ..Default::default()
            },
            allocatable: ResourceQuantity {
                millicpu: 4000,
                memory_bytes: 4 << 30,
            },
        }
    }

    fn workload(ns: &str, name: &str, node_name: &str) -> WorkloadObject {
        WorkloadObject {
            key: WorkloadKey {
                namespace: ns.to_string(),
                name: name.to_string(),
            },
            node_name: node_name.to_string(),
            owner: Some(OwnerRef {
                kind: OwnerRef::STATELESS_REPLICA_CONTROLLER.to_string(),
                name: "rs".to_string(),
            }),
            deletion_timestamp: None,
            has_affinity: false,
            node_selector: Default::default(),
            requested: ResourceQuantity::default(),
        }
    }

    #[test]
    fn workload_enters_at_most_one_node() {
        let cache = NodeCache::new();
        cache.observe_node_upsert(node("n1", true));
        cache.observe_node_upsert(node("n2", true));
        cache.observe_workload_upsert(workload("default", "w1", "n1"));
        assert_eq!(cache.workload_count("n1"), 1);
        assert_eq!(cache.workload_count("n2"), 0);
    }

    #[test]
    fn reassignment_update_is_dropped() {
        let cache = NodeCache::new();
        cache.observe_node_upsert(node("n1", true));
        cache.observe_node_upsert(node("n2", true));
        cache.observe_workload_upsert(workload("default", "w1", "n1"));
        // Simulate an update event whose node name changed: per spec this is dropped, not
        // applied as delete-then-add.
        cache.observe_workload_upsert(workload("default", "w1", "n2"));
        assert_eq!(cache.workload_count("n1"), 1);
        assert_eq!(cache.workload_count("n2"), 0);
    }

    #[test]
    fn same_node_update_replaces_in_place() {
        let cache = NodeCache::new();
        cache.observe_node_upsert(node("n1", true));
        cache.observe_workload_upsert(workload("default", "w1", "n1"));
        cache.observe_workload_upsert(workload("default", "w1", "n1"));
        assert_eq!(cache.workload_count("n1"), 1);
    }

    #[test]
    fn add_then_delete_is_idempotent_no_op() {
        let cache = NodeCache::new();
        cache.observe_node_upsert(node("n1", true));
        cache.observe_workload_upsert(workload("default", "w1", "n1"));
        cache.observe_workload_delete(&WorkloadKey {
            namespace: "default".to_string(),
            name: "w1".to_string(),
        });
        assert_eq!(cache.workload_count("n1"), 0);
        assert_eq!(cache.node_count(), 1);
    }

    #[test]
    fn bootstrap_then_replay_equals_bootstrap_alone() {
        let workloads = vec![workload("default", "w1", "n1"), workload("default", "w2", "n1")];
        let cache_a = NodeCache::new();
        cache_a.observe_node_upsert(node("n1", true));
        cache_a.bootstrap_from_snapshot(workloads.clone());

        let cache_b = NodeCache::new();
        cache_b.observe_node_upsert(node("n1", true));
        cache_b.bootstrap_from_snapshot(workloads.clone());
        for w in workloads {
            cache_b.observe_workload_upsert(w);
        }

        assert_eq!(cache_a.workload_count("n1"), cache_b.workload_count("n1"));
    }

    #[test]
    fn workload_on_unknown_node_is_ignored_without_error() {
        let cache = NodeCache::new();
        cache.observe_workload_upsert(workload("default", "w1", "ghost"));
        // The entry is created (first observation), but it never appears in score_all or
        // filter_res_pressure because it has no node object yet.
        assert!(cache.score_all().is_empty());
        assert!(cache.filter_res_pressure().is_empty());
        assert!(cache.clone_node_ext("ghost").is_none());
    }

    #[test]
    fn node_delete_orphans_workloads_without_panicking() {
        let cache = NodeCache::new();
        cache.observe_node_upsert(node("n1", true));
        cache.observe_workload_upsert(workload("default", "w1", "n1"));
        cache.observe_node_delete("n1");
        // The orphaned workload's delete event should still be handled cleanly.
        cache.observe_workload_delete(&WorkloadKey {
            namespace: "default".to_string(),
            name: "w1".to_string(),
        });
        assert_eq!(cache.node_count(), 0);
    }

    #[test]
    fn concurrent_events_never_panic_and_converge() {
        let cache = Arc::new(NodeCache::new());
        let mut handles = Vec::new();
        for t in 0..8 {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let name = format!("n{}", i % 4);
                    cache.observe_node_upsert(node(&name, true));
                    let w = workload("default", &format!("w{t}-{i}"), &name);
                    cache.observe_workload_upsert(w.clone());
                    if i % 7 == 0 {
                        cache.observe_workload_delete(&w.key);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        // No panics, and every node's working() read is well-defined (not torn).
        for (_, score) in cache.score_all() {
            assert!((0..=100).contains(&score));
        }
    }
}
