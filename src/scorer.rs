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

//! Simulates the orchestrator's multi-priority scheduler scoring for a node's *current fill
//! level*, rather than for placing a new workload. The trick (borrowed from the balancer this
//! crate is modeled on) is to score a fixed, resourceless dummy workload against the node: since
//! none of the three priority functions below look at anything but the node's own allocated vs.
//! allocatable resources, scoring the dummy is equivalent to scoring the node standalone.

use crate::client::{NodeObject, ResourceQuantity, WorkloadObject};

/// Dummy workload used to probe a node's fill level. Namespace/name/image are cosmetic; what
/// matters is that it requests no resources, so it never perturbs the ratio being measured.
pub fn dummy_workload() -> WorkloadObject {
    WorkloadObject {
        key: crate::client::WorkloadKey {
            namespace: "default".to_string(),
            name: "fake".to_string(),
        },
        node_name: String::new(),
        owner: None,
        deletion_timestamp: None,
        has_affinity: false,
        node_selector: Default::default(),
        requested: ResourceQuantity::default(),
    }
}

/// Weight of each sub-score. All three are weighted equally in this configuration; kept as a
/// named constant (rather than a literal `1`) so a future tuning pass has one place to change.
const PRIORITY_WEIGHT: i32 = 1;

/// The target utilization fraction `requested_to_capacity_ratio` is configured at: scores 10 at
/// ratio 0.0 (idle) down to 0 at this ratio (saturated), linear in between.
const REQUESTED_TO_CAPACITY_TARGET: f64 = 1.0;

/// An ordered `(host, score)` pair list, as produced by [`prioritize_nodes`] and
/// [`score_single_node`]. Ordering is not meaningful; callers scan or sort as needed.
pub type HostPriorityList = Vec<(String, i32)>;

/// Sum of a node's currently-requested resources across its assigned workloads.
fn total_requested(workloads: impl IntoIterator<Item = ResourceQuantity>) -> ResourceQuantity {
    workloads.into_iter().fold(ResourceQuantity::default(), |mut acc, r| {
        acc.millicpu += r.millicpu;
        acc.memory_bytes += r.memory_bytes;
        acc
    })
}

fn fraction(requested: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        0.0
    } else {
        (requested as f64 / capacity as f64).clamp(0.0, 1.0)
    }
}

/// `RequestedToCapacityRatioResourceAllocationPriorityDefault` shape: a step function scoring 0
/// at ratio [`REQUESTED_TO_CAPACITY_TARGET`] and 10 at ratio 0.0, linear in between, independently
/// for cpu and memory, then averaged. Monotonically decreasing: idle nodes score highest.
fn requested_to_capacity_ratio_sub_score(cpu_fraction: f64, mem_fraction: f64) -> f64 {
    let shape = |f: f64| -> f64 { 10.0 * (1.0 - f / REQUESTED_TO_CAPACITY_TARGET) };
    ((shape(cpu_fraction) + shape(mem_fraction)) / 2.0).clamp(0.0, 10.0)
}

/// Prefers nodes with more free capacity: monotonically decreasing in the requested fraction.
fn least_requested_sub_score(cpu_fraction: f64, mem_fraction: f64) -> f64 {
    let shape = |f: f64| 10.0 * (1.0 - f);
    ((shape(cpu_fraction) + shape(mem_fraction)) / 2.0).clamp(0.0, 10.0)
}

/// Prefers nodes whose CPU and memory fractions are close to each other.
fn balanced_resource_allocation_sub_score(cpu_fraction: f64, mem_fraction: f64) -> f64 {
    (10.0 * (1.0 - (cpu_fraction - mem_fraction).abs())).clamp(0.0, 10.0)
}

/// Scores a single node against `dummy`, given the resources its assigned workloads have
/// already requested. This is the function [`crate::cache::NodeCache::clone_node_ext`] and
/// [`crate::node_ext::NodeInfoExt`] call after every hypothetical mutation.
pub fn score_single_node(
    node: &NodeObject,
    requested_by_workloads: impl IntoIterator<Item = ResourceQuantity>,
    _dummy: &WorkloadObject,
) -> i32 {
    let requested = total_requested(requested_by_workloads);
    let cpu_fraction = fraction(requested.millicpu, node.allocatable.millicpu);
    let mem_fraction = fraction(requested.memory_bytes, node.allocatable.memory_bytes);

    let sub_scores = [
        requested_to_capacity_ratio_sub_score(cpu_fraction, mem_fraction),
        least_requested_sub_score(cpu_fraction, mem_fraction),
        balanced_resource_allocation_sub_score(cpu_fraction, mem_fraction),
    ];
    let max_total = 10.0 * sub_scores.len() as f64 * PRIORITY_WEIGHT as f64;
    let total: f64 = sub_scores.iter().map(|s| s * PRIORITY_WEIGHT as f64).sum();

    ((total / max_total) * 100.0).round() as i32
}

/// Scores every candidate node against the same dummy workload, returning a [`HostPriorityList`]
/// in arbitrary order.
pub fn prioritize_nodes<'a>(
    dummy: &WorkloadObject,
    candidates: impl IntoIterator<Item = (&'a NodeObject, &'a [WorkloadObject])>,
) -> HostPriorityList {
    candidates
        .into_iter()
        .map(|(node, workloads)| {
            let score = score_single_node(node, workloads.iter().map(|w| w.requested), dummy);
            (node.name.clone(), score)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{NodeConditions, NodeObject};

    fn node(millicpu: u64, mem: u64) -> NodeObject {
        NodeObject {
            name: "n".to_string(),
            unschedulable: false,
            tainted: false,
            terminating: false,
            conditions: NodeConditions {
                ready: true,
                ..Default::default()
            },
            allocatable: ResourceQuantity {
                millicpu,
                memory_bytes: mem,
            },
        }
    }

    #[test]
    fn empty_node_scores_high() {
        let n = node(4000, 4 << 30);
        let score = score_single_node(&n, [], &dummy_workload());
        assert!(score > 50, "idle node should score well above midpoint, got {score}");
    }

    #[test]
    fn fully_requested_node_scores_low() {
        let n = node(4000, 4 << 30);
        let full = ResourceQuantity {
            millicpu: 4000,
            memory_bytes: 4 << 30,
        };
        let score = score_single_node(&n, [full], &dummy_workload());
        assert!(score < 50, "saturated node should score below midpoint, got {score}");
    }

    #[test]
    fn zero_capacity_node_does_not_panic() {
        let n = node(0, 0);
        let score = score_single_node(&n, [], &dummy_workload());
        assert!((0..=100).contains(&score));
    }

    #[test]
    fn balanced_allocation_beats_skewed_at_equal_total() {
        let n = node(1000, 1000);
        let skewed = ResourceQuantity {
            millicpu: 800,
            memory_bytes: 200,
        };
        let balanced = ResourceQuantity {
            millicpu: 500,
            memory_bytes: 500,
        };
        let skewed_score = score_single_node(&n, [skewed], &dummy_workload());
        let balanced_score = score_single_node(&n, [balanced], &dummy_workload());
        assert!(balanced_score >= skewed_score);
    }

    #[test]
    fn scores_are_deterministic() {
        let n = node(2000, 2 << 30);
        let requested = ResourceQuantity {
            millicpu: 500,
            memory_bytes: 1 << 30,
        };
        let a = score_single_node(&n, [requested], &dummy_workload());
        let b = score_single_node(&n, [requested], &dummy_workload());
        assert_eq!(a, b);
    }
}
