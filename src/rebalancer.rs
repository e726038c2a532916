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

//! The two-phase eviction algorithm: drain statistically-bad nodes first, to their threshold and
//! no further, then randomly redistribute pressure off below-mean nodes until the right-outlier
//! "destinations" the pass is simulating placements onto are no longer overloaded.
//!
//! Everything here operates on [`NodeInfoExt`] sandboxes cloned out of [`NodeCache`]; the
//! orchestrator API is only ever called with no lock held.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cache::NodeCache;
use crate::client::{AuditEvent, DeleteError, EventSink, WorkloadDeleter, WorkloadKey, WorkloadObject};
use crate::distribution::HostGsl;
use crate::error::{RebalanceError, RebalancerResult};
use crate::node_ext::NodeInfoExt;

/// Per-pass counters, mostly useful for tests and for the `tracing::info!` summary line the
/// controller driver logs after each tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceSummary {
    pub evicted: usize,
    pub skipped_ineligible: usize,
    pub delete_failed: usize,
}

/// Orchestrates one rebalancing pass. Cheap to construct; holds only shared references to the
/// cache and the orchestrator collaborators.
pub struct Rebalancer {
    cache: Arc<NodeCache>,
    deleter: Arc<dyn WorkloadDeleter>,
    event_sink: Arc<dyn EventSink>,
    ratio: f64,
}

/// The simulation-only bookkeeping for Phase 1/2's "pretend the evicted workload landed here"
/// accounting. Named distinctly from [`NodeInfoExt`] so it's never mistaken for a real placement:
/// nothing here is sent to the orchestrator.
type ProjectedPlacements = HashMap<String, NodeInfoExt>;

fn is_res_full(destinations: &ProjectedPlacements, right: f64) -> bool {
    destinations.values().all(|d| d.score() <= right)
}

/// Adds `workload` to every destination whose simulated score is still above `right`. A
/// destination that has already fallen to or below `right` is "full" and is left alone.
fn project_onto_destinations(destinations: &mut ProjectedPlacements, workload: &WorkloadObject, right: f64) {
    for dest in destinations.values_mut() {
        if dest.score() > right {
            dest.add_workload(workload.clone());
        }
    }
}

impl Rebalancer {
    pub fn new(cache: Arc<NodeCache>, deleter: Arc<dyn WorkloadDeleter>, event_sink: Arc<dyn EventSink>, ratio: f64) -> Self {
        Self {
            cache,
            deleter,
            event_sink,
            ratio,
        }
    }

    /// Issues a delete and reports it, per the error policy shared by both phases: "not found" is
    /// treated as success, any other error is logged and the workload is skipped.
    async fn try_delete(&self, key: &WorkloadKey, node_name: &str) -> bool {
        match self.deleter.delete_workload(key).await {
            Ok(()) => {
                self.event_sink.emit(AuditEvent::success_delete(key.clone(), node_name));
                tracing::info!(workload = %key, node = node_name, "deleted workload");
                true
            }
            Err(DeleteError::NotFound) => {
                self.event_sink.emit(AuditEvent::success_delete(key.clone(), node_name));
                tracing::info!(workload = %key, node = node_name, "workload already gone, treating as deleted");
                true
            }
            Err(err) => {
                self.event_sink.emit(AuditEvent::failed_delete(key.clone(), &err));
                tracing::warn!(workload = %key, node = node_name, error = %err, "failed to delete workload");
                false
            }
        }
    }

    /// Runs one full pass: classify hosts, drain the bad, then balance the mediocre. At most one
    /// pass should ever be in flight; the controller driver enforces this by awaiting each call
    /// to completion before starting the next tick.
    pub async fn rebalance(&self) -> RebalancerResult<RebalanceSummary> {
        let host_list = self.cache.score_all();
        if host_list.is_empty() {
            return Err(RebalanceError::NoScorableNodes.into());
        }
        let gsl = HostGsl::compute(host_list);

        let res_pressure = self.cache.filter_res_pressure();
        let (left_hosts, left) = gsl.outliers_left(self.ratio);
        let (right_hosts, right) = gsl.outliers_right(self.ratio);
        tracing::info!(
            mean = gsl.mean(),
            sd = gsl.sd(),
            ?res_pressure,
            ?left_hosts,
            left,
            ?right_hosts,
            right,
            "rebalance pass starting"
        );

        let mut sources: ProjectedPlacements = HashMap::new();
        for name in res_pressure.into_iter().chain(left_hosts) {
            if let Some(sandbox) = self.cache.clone_node_ext(&name) {
                sources.insert(name, sandbox);
            }
        }
        let mut destinations: ProjectedPlacements = HashMap::new();
        for name in right_hosts {
            if let Some(sandbox) = self.cache.clone_node_ext(&name) {
                destinations.insert(name, sandbox);
            }
        }

        let mut summary = RebalanceSummary::default();
        self.drain_sources(&mut sources, &mut destinations, left, right, &mut summary).await;
        self.balance_below_mean(&gsl, &mut destinations, right, &mut summary).await;

        tracing::info!(?summary, "rebalance pass finished");
        Ok(summary)
    }

    /// Phase 1: for each source node, evict workloads one at a time until its simulated score
    /// rises to at least `left`, then move to the next source.
    async fn drain_sources(
        &self,
        sources: &mut ProjectedPlacements,
        destinations: &mut ProjectedPlacements,
        left: f64,
        right: f64,
        summary: &mut RebalanceSummary,
    ) {
        for (name, sandbox) in sources.iter_mut() {
            let keys: Vec<WorkloadKey> = sandbox.workloads().map(|w| w.key.clone()).collect();
            for key in keys {
                let Some(workload) = sandbox.workloads().find(|w| w.key == key).cloned() else {
                    continue;
                };
                if !workload.is_evictable() {
                    summary.skipped_ineligible += 1;
                    tracing::debug!(workload = %key, node = %name, "skipping ineligible workload");
                    continue;
                }
                if self.try_delete(&key, name).await {
                    sandbox.remove_workload(&key);
                    project_onto_destinations(destinations, &workload, right);
                    summary.evicted += 1;
                } else {
                    summary.delete_failed += 1;
                    continue;
                }
                if sandbox.score() >= left {
                    break;
                }
            }
        }
    }

    /// Phase 2: while some destination is still above `right`, randomly pick a below-mean node,
    /// randomly pick one of its workloads, and evict it if eligible. The workload is removed from
    /// its sandbox unconditionally, before the eligibility check, so the loop always makes
    /// progress even when it repeatedly lands on ineligible workloads.
    async fn balance_below_mean(
        &self,
        gsl: &HostGsl,
        destinations: &mut ProjectedPlacements,
        right: f64,
        summary: &mut RebalanceSummary,
    ) {
        let mut below_mean: Option<Vec<String>> = None;
        let mut hydrated: ProjectedPlacements = HashMap::new();
        let mut rng = StdRng::from_entropy();

        while !is_res_full(destinations, right) {
            let candidates = below_mean.get_or_insert_with(|| gsl.below_mean());
            if candidates.is_empty() {
                return;
            }
            let idx = rng.gen_range(0..candidates.len());
            let node_name = candidates[idx].clone();

            if !hydrated.contains_key(&node_name) {
                match self.cache.clone_node_ext(&node_name) {
                    Some(sandbox) if !sandbox.is_empty() => {
                        hydrated.insert(node_name.clone(), sandbox);
                    }
                    _ => {
                        candidates.remove(idx);
                        continue;
                    }
                }
            }

            let sandbox = hydrated.get_mut(&node_name).expect("just hydrated or already present");
            if sandbox.is_empty() {
                candidates.remove(idx);
                hydrated.remove(&node_name);
                continue;
            }

            let keys: Vec<WorkloadKey> = sandbox.workloads().map(|w| w.key.clone()).collect();
            let key = keys[rng.gen_range(0..keys.len())].clone();
            // Unconditional removal guarantees progress: this exact workload is never picked
            // again this pass, even if it turns out to be ineligible.
            let workload = sandbox.remove_workload(&key).expect("key was just read from this sandbox");

            if !workload.is_evictable() {
                summary.skipped_ineligible += 1;
                continue;
            }
            if self.try_delete(&key, &node_name).await {
                project_onto_destinations(destinations, &workload, right);
                summary.evicted += 1;
            } else {
                summary.delete_failed += 1;
            }
        }
    }
}
