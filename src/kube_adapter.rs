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

//! The concrete Kubernetes binding for the [`crate::client`] traits, built on `kube` and
//! `k8s-openapi`. This is the only module in the crate that talks to a real cluster; everything
//! else is exercised against fakes of the traits defined in `client.rs`.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, ListParams};
use kube::runtime::watcher::{self, Event};
use kube::{Client, Config};

use crate::client::{
    AuditEvent, DeleteError, EventSeverity, EventSink, EventWatcher, NodeConditions, NodeObject, OwnerRef, ResourceQuantity, WatchEvent, WorkloadDeleter, WorkloadKey,
    WorkloadLister, WorkloadObject,
};

/// Kubernetes-backed implementation of the orchestrator contract, sharing one `kube::Client`
/// across listing, watching, and deleting.
pub struct KubeAdapter {
    client: Client,
}

impl KubeAdapter {
    /// Builds a client from an explicit kubeconfig path, falling back to the default
    /// discovery chain (`KUBECONFIG` env var, `~/.kube/config`, in-cluster config) when `None`.
    pub async fn connect(kubeconfig: Option<&str>) -> anyhow::Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = kube::config::Kubeconfig::read_from(path)?;
                let config = Config::from_custom_kubeconfig(kubeconfig, &Default::default()).await?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };
        Ok(Self { client })
    }

    fn pods(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

fn node_from_k8s(node: Node) -> Option<NodeObject> {
    let name = node.metadata.name?;
    let spec = node.spec.unwrap_or_default();
    let status = node.status.unwrap_or_default();
    let conditions = status.conditions.unwrap_or_default();

    let condition_is_true = |kind: &str| conditions.iter().any(|c| c.type_ == kind && c.status == "True");

    let allocatable = status.allocatable.unwrap_or_default();
    let millicpu = allocatable.get("cpu").map(|q| parse_cpu_millis(&q.0)).unwrap_or(0);
    let memory_bytes = allocatable.get("memory").map(|q| parse_memory_bytes(&q.0)).unwrap_or(0);

    Some(NodeObject {
        name,
        unschedulable: spec.unschedulable.unwrap_or(false),
        tainted: spec.taints.map(|t| !t.is_empty()).unwrap_or(false),
        terminating: node.metadata.deletion_timestamp.is_some(),
        conditions: NodeConditions {
            ready: condition_is_true("Ready"),
            memory_pressure: condition_is_true("MemoryPressure"),
            disk_pressure: condition_is_true("DiskPressure"),
            pid_pressure: condition_is_true("PIDPressure"),
        },
        allocatable: ResourceQuantity { millicpu, memory_bytes },
    })
}

/// Parses a Kubernetes CPU quantity (e.g. `"500m"`, `"2"`) into millicpu.
fn parse_cpu_millis(raw: &str) -> u64 {
    if let Some(stripped) = raw.strip_suffix('m') {
        stripped.parse().unwrap_or(0)
    } else {
        raw.parse::<f64>().map(|cores| (cores * 1000.0) as u64).unwrap_or(0)
    }
}

/// Parses a Kubernetes memory quantity (e.g. `"512Mi"`, `"2Gi"`, `"1024"`) into bytes.
fn parse_memory_bytes(raw: &str) -> u64 {
    const UNITS: &[(&str, u64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("K", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
    ];
    for (suffix, multiplier) in UNITS {
        if let Some(stripped) = raw.strip_suffix(suffix) {
            return stripped.parse::<f64>().map(|n| (n * *multiplier as f64) as u64).unwrap_or(0);
        }
    }
    raw.parse().unwrap_or(0)
}

fn owner_ref_from_k8s(pod: &Pod) -> Option<OwnerRef> {
    pod.metadata.owner_references.as_ref()?.iter().find(|o| o.controller == Some(true)).map(|o| OwnerRef {
        kind: o.kind.clone(),
        name: o.name.clone(),
    })
}

fn resource_quantity_from_pod(pod: &Pod) -> ResourceQuantity {
    let mut total = ResourceQuantity::default();
    let Some(spec) = &pod.spec else {
        return total;
    };
    for container in &spec.containers {
        let Some(resources) = &container.resources else { continue };
        let Some(requests) = &resources.requests else { continue };
        if let Some(cpu) = requests.get("cpu") {
            total.millicpu += parse_cpu_millis(&cpu.0);
        }
        if let Some(memory) = requests.get("memory") {
            total.memory_bytes += parse_memory_bytes(&memory.0);
        }
    }
    total
}

fn workload_from_pod(pod: Pod) -> Option<WorkloadObject> {
    let metadata = pod.metadata.clone();
    let key = WorkloadKey {
        namespace: metadata.namespace?,
        name: metadata.name?,
    };
    let node_name = pod.spec.as_ref().and_then(|s| s.node_name.clone()).unwrap_or_default();
    let node_selector: HashMap<String, String> = pod.spec.as_ref().map(|s| s.node_selector.clone().unwrap_or_default()).unwrap_or_default();
    let has_affinity = pod.spec.as_ref().map(|s| s.affinity.is_some()).unwrap_or(false);
    let deletion_timestamp = metadata.deletion_timestamp.map(|t| t.0.timestamp() as u64);
    let requested = resource_quantity_from_pod(&pod);
    let owner = owner_ref_from_k8s(&pod);

    Some(WorkloadObject {
        key,
        node_name,
        owner,
        deletion_timestamp,
        has_affinity,
        node_selector,
        requested,
    })
}

#[async_trait]
impl WorkloadLister for KubeAdapter {
    async fn list_workloads(&self) -> anyhow::Result<Vec<WorkloadObject>> {
        let list = self.pods().list(&ListParams::default()).await?;
        Ok(list.items.into_iter().filter_map(workload_from_pod).collect())
    }
}

/// A single `watcher::Event` can carry zero, one, or (on `Restarted`, after a reconnect) many
/// underlying objects; this flattens all three shapes into a plain `Vec` of our own event type.
fn node_watch_to_events(event: Result<Event<Node>, watcher::Error>) -> Vec<WatchEvent> {
    match event {
        Ok(Event::Applied(node)) => node_from_k8s(node).map(WatchEvent::NodeUpserted).into_iter().collect(),
        Ok(Event::Deleted(node)) => node.metadata.name.map(WatchEvent::NodeDeleted).into_iter().collect(),
        Ok(Event::Restarted(nodes)) => nodes.into_iter().filter_map(node_from_k8s).map(WatchEvent::NodeUpserted).collect(),
        Err(err) => {
            tracing::warn!(error = %err, "node watch error");
            Vec::new()
        }
    }
}

fn pod_watch_to_events(event: Result<Event<Pod>, watcher::Error>) -> Vec<WatchEvent> {
    let workload_deleted = |pod: Pod| -> Option<WatchEvent> {
        Some(WatchEvent::WorkloadDeleted(WorkloadKey {
            namespace: pod.metadata.namespace?,
            name: pod.metadata.name?,
        }))
    };
    match event {
        Ok(Event::Applied(pod)) => workload_from_pod(pod).map(WatchEvent::WorkloadUpserted).into_iter().collect(),
        Ok(Event::Deleted(pod)) => workload_deleted(pod).into_iter().collect(),
        Ok(Event::Restarted(pods)) => pods.into_iter().filter_map(workload_from_pod).map(WatchEvent::WorkloadUpserted).collect(),
        Err(err) => {
            tracing::warn!(error = %err, "pod watch error");
            Vec::new()
        }
    }
}

impl EventWatcher for KubeAdapter {
    fn watch(&self) -> BoxStream<'static, WatchEvent> {
        let node_events = watcher::watcher(self.nodes(), watcher::Config::default()).flat_map(|event| futures::stream::iter(node_watch_to_events(event)));
        let pod_events = watcher::watcher(self.pods(), watcher::Config::default()).flat_map(|event| futures::stream::iter(pod_watch_to_events(event)));

        let merged = futures::stream::select(node_events, pod_events);
        // `Controller` only needs `InitialSyncComplete` to arrive once, before it trusts the
        // cache enough to issue the bootstrap list call; it doesn't need it synchronized with the
        // underlying watchers' own first `Restarted` batch, since the controller always follows
        // up with an explicit `list_workloads` call to build the authoritative starting snapshot.
        futures::stream::once(async { WatchEvent::InitialSyncComplete }).chain(merged).boxed()
    }
}

#[async_trait]
impl WorkloadDeleter for KubeAdapter {
    async fn delete_workload(&self, key: &WorkloadKey) -> Result<(), DeleteError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &key.namespace);
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => Err(DeleteError::NotFound),
            Err(err) => Err(DeleteError::Other(err.to_string())),
        }
    }
}

/// Surfaces audit events through `tracing` rather than posting Kubernetes `Event` objects: doing
/// the latter well means resolving an `involvedObject` reference back to the deleted pod's UID,
/// which is no longer available once the pod is gone. Operators are expected to wire these lines
/// into their existing log pipeline instead.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: AuditEvent) {
        match event.severity {
            EventSeverity::Normal => tracing::info!(reason = event.reason, target = %event.target, "{}", event.message),
            EventSeverity::Warning => tracing::warn!(reason = event.reason, target = %event.target, "{}", event.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_millicpu_suffix() {
        assert_eq!(parse_cpu_millis("500m"), 500);
        assert_eq!(parse_cpu_millis("2"), 2000);
    }

    #[test]
    fn parses_binary_memory_suffixes() {
        assert_eq!(parse_memory_bytes("1Ki"), 1024);
        assert_eq!(parse_memory_bytes("2Gi"), 2 << 30);
    }
}
