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

//! The orchestrator contract consumed by the rest of this crate.
//!
//! Everything in this module is a trait or a plain data type: the actual orchestrator API
//! client, its watch-stream implementation, and kubeconfig discovery are external collaborators
//! (see [`crate::kube_adapter`] for one concrete binding) and are deliberately kept out of the
//! hard core so [`crate::cache`], [`crate::rebalancer`] and friends can be exercised with fakes.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

/// A node name. Stable and unique within the cluster.
pub type NodeName = String;

/// Identifies a workload by its namespace and name, mirroring how the orchestrator addresses
/// individually-owned objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadKey {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The controller that owns a workload, e.g. a stateless replica controller or a stateful set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

impl OwnerRef {
    /// The only owner kind whose members this rebalancer is willing to evict.
    pub const STATELESS_REPLICA_CONTROLLER: &'static str = "ReplicaSet";

    pub fn is_stateless_replica_controller(&self) -> bool {
        self.kind == Self::STATELESS_REPLICA_CONTROLLER
    }
}

/// A resource quantity, expressed the way the orchestrator's scheduler expects: millicpu and
/// bytes so that fractional CPU requests don't need floating point in the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceQuantity {
    pub millicpu: u64,
    pub memory_bytes: u64,
}

/// A node's observed conditions, as reported by its kubelet-equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeConditions {
    pub ready: bool,
    pub memory_pressure: bool,
    pub disk_pressure: bool,
    pub pid_pressure: bool,
}

/// A snapshot of a node object as observed from the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeObject {
    pub name: NodeName,
    pub unschedulable: bool,
    pub tainted: bool,
    pub terminating: bool,
    pub conditions: NodeConditions,
    pub allocatable: ResourceQuantity,
}

impl NodeObject {
    /// `working(node)`: not terminating, not unschedulable, untainted, Ready=true.
    pub fn is_working(&self) -> bool {
        !self.terminating && !self.unschedulable && !self.tainted && self.conditions.ready
    }

    /// `res-pressure(node)`: any of MemoryPressure, DiskPressure, PIDPressure is true.
    pub fn has_res_pressure(&self) -> bool {
        self.conditions.memory_pressure || self.conditions.disk_pressure || self.conditions.pid_pressure
    }
}

/// A snapshot of a workload object as observed from the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadObject {
    pub key: WorkloadKey,
    /// Empty means "not assigned"; such workloads are ignored by the cache.
    pub node_name: NodeName,
    pub owner: Option<OwnerRef>,
    pub deletion_timestamp: Option<u64>,
    pub has_affinity: bool,
    pub node_selector: HashMap<String, String>,
    pub requested: ResourceQuantity,
}

impl WorkloadObject {
    pub fn is_assigned(&self) -> bool {
        !self.node_name.is_empty()
    }

    /// Evictable iff: owned by a stateless replica controller, no pending deletion, no
    /// affinity, no node selector, and assigned.
    pub fn is_evictable(&self) -> bool {
        self.is_assigned()
            && self.deletion_timestamp.is_none()
            && !self.has_affinity
            && self.node_selector.is_empty()
            && self
                .owner
                .as_ref()
                .is_some_and(OwnerRef::is_stateless_replica_controller)
    }
}

/// A tagged-variant view of the raw event stream, narrowed once at the subscription boundary into
/// an exhaustive, compile-time-checked enum instead of dispatching on a dynamically-typed payload
/// on every callback.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    NodeUpserted(NodeObject),
    NodeDeleted(NodeName),
    WorkloadUpserted(WorkloadObject),
    WorkloadDeleted(WorkloadKey),
    /// Emitted exactly once, after the initial list-and-watch sync completes.
    InitialSyncComplete,
}

/// Severity of an [`AuditEvent`], mirroring the orchestrator's own event severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// An audit-trail entry describing one action the rebalancer took (or attempted).
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub severity: EventSeverity,
    pub reason: &'static str,
    pub message: String,
    pub target: WorkloadKey,
}

impl AuditEvent {
    pub fn success_delete(target: WorkloadKey, node: &str) -> Self {
        Self {
            severity: EventSeverity::Normal,
            reason: "SuccessDeleteWorkload",
            message: format!("delete workload {target} success on node {node}"),
            target,
        }
    }

    pub fn failed_delete(target: WorkloadKey, error: &DeleteError) -> Self {
        Self {
            severity: EventSeverity::Warning,
            reason: "FailedDeleteWorkload",
            message: format!("delete workload {target} error: {error}"),
            target,
        }
    }
}

/// Error returned by [`WorkloadDeleter::delete_workload`]. `NotFound` is benign: the workload
/// vanished between the decision and the action and is treated as a successful delete.
#[derive(thiserror::Error, Debug, Clone)]
pub enum DeleteError {
    #[error("workload not found")]
    NotFound,
    #[error("orchestrator API error: {0}")]
    Other(String),
}

/// Enumerates all currently assigned workloads. Used once, at startup, to bootstrap the cache
/// before the watch stream is trusted.
#[async_trait]
pub trait WorkloadLister: Send + Sync {
    async fn list_workloads(&self) -> anyhow::Result<Vec<WorkloadObject>>;
}

/// Delivers add/update/delete events for node and workload objects, admitting only assigned
/// workloads, with an [`WatchEvent::InitialSyncComplete`] signal once the initial list is done.
/// Events for the same object arrive in order; no ordering is guaranteed across objects.
pub trait EventWatcher: Send + Sync {
    fn watch(&self) -> BoxStream<'static, WatchEvent>;
}

/// Issues delete calls against the orchestrator API.
#[async_trait]
pub trait WorkloadDeleter: Send + Sync {
    async fn delete_workload(&self, key: &WorkloadKey) -> Result<(), DeleteError>;
}

/// Surfaces audit events for operator visibility, e.g. as orchestrator `Event` objects.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}
