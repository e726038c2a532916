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

//! Wires the orchestrator event stream to the [`NodeCache`], bootstraps it, and drives periodic
//! rebalancing passes until asked to shut down.
//!
//! Modeled on the heartbeat-checker loop in `ClusterManager::start_heartbeat_checker`: a
//! `tokio::time::interval` ticking on a fixed period, `select!`-ed against a `oneshot` shutdown
//! signal so the loop exits promptly rather than waiting out its current tick.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::cache::NodeCache;
use crate::client::{EventSink, EventWatcher, WatchEvent, WorkloadDeleter, WorkloadLister};
use crate::rebalancer::Rebalancer;

/// Owns the cache and the periodic pass; the long-lived task driving the control loop.
pub struct Controller {
    cache: Arc<NodeCache>,
    watcher: Arc<dyn EventWatcher>,
    lister: Arc<dyn WorkloadLister>,
    rebalancer: Rebalancer,
    recycle_period: Duration,
}

impl Controller {
    pub fn new(
        watcher: Arc<dyn EventWatcher>,
        lister: Arc<dyn WorkloadLister>,
        deleter: Arc<dyn WorkloadDeleter>,
        event_sink: Arc<dyn EventSink>,
        recycle_period: Duration,
        ratio: f64,
    ) -> Self {
        let cache = Arc::new(NodeCache::new());
        let rebalancer = Rebalancer::new(cache.clone(), deleter, event_sink, ratio);
        Self {
            cache,
            watcher,
            lister,
            rebalancer,
            recycle_period,
        }
    }

    /// Subscribes to the event stream, applies events to the cache until
    /// [`WatchEvent::InitialSyncComplete`] arrives, bootstraps from a fresh list call, then spawns
    /// an independent task to keep forwarding live events while this task drives a rebalancing
    /// pass on every tick. Runs until `shutdown` resolves.
    ///
    /// Event forwarding runs on its own task rather than sharing a `select!` with the ticker:
    /// a pass can span many sequential delete round-trips, and dispatch must only block briefly
    /// on the cache's mutex, not for a whole pass's duration.
    pub async fn run(self, shutdown: oneshot::Receiver<()>) -> anyhow::Result<()> {
        let mut events = self.watcher.watch();

        tracing::info!("waiting for initial sync");
        while let Some(event) = events.next().await {
            Self::apply(&self.cache, event.clone());
            if matches!(event, WatchEvent::InitialSyncComplete) {
                break;
            }
        }

        tracing::info!("initial sync complete, bootstrapping from a fresh list");
        let snapshot = self.lister.list_workloads().await?;
        self.cache.bootstrap_from_snapshot(snapshot);

        let cache = self.cache.clone();
        let event_task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                Self::apply(&cache, event);
            }
            tracing::warn!("event stream ended unexpectedly");
        });

        let mut ticker = tokio::time::interval(self.recycle_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut shutdown = shutdown;
        let result = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, exiting control loop");
                    break Ok(());
                }
                _ = ticker.tick() => {
                    match self.rebalancer.rebalance().await {
                        Ok(summary) => tracing::info!(?summary, "rebalance tick complete"),
                        Err(err) => tracing::warn!(error = %err, "rebalance tick failed"),
                    }
                }
            }
        };
        event_task.abort();
        result
    }

    #[cfg(test)]
    pub(crate) fn cache_handle(&self) -> Arc<NodeCache> {
        self.cache.clone()
    }

    fn apply(cache: &NodeCache, event: WatchEvent) {
        match event {
            WatchEvent::NodeUpserted(node) => cache.observe_node_upsert(node),
            WatchEvent::NodeDeleted(name) => cache.observe_node_delete(&name),
            WatchEvent::WorkloadUpserted(workload) => cache.observe_workload_upsert(workload),
            WatchEvent::WorkloadDeleted(key) => cache.observe_workload_delete(&key),
            WatchEvent::InitialSyncComplete => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};

    use super::*;
    use crate::client::{AuditEvent, DeleteError, NodeConditions, NodeObject, OwnerRef, ResourceQuantity, WorkloadKey, WorkloadObject};

    struct EmptyWatcher;
    impl EventWatcher for EmptyWatcher {
        fn watch(&self) -> BoxStream<'static, WatchEvent> {
            stream::iter(vec![WatchEvent::InitialSyncComplete]).boxed()
        }
    }

    struct EmptyLister;
    #[async_trait]
    impl WorkloadLister for EmptyLister {
        async fn list_workloads(&self) -> anyhow::Result<Vec<WorkloadObject>> {
            Ok(Vec::new())
        }
    }

    struct NoopDeleter(AtomicUsize);
    #[async_trait]
    impl WorkloadDeleter for NoopDeleter {
        async fn delete_workload(&self, _key: &WorkloadKey) -> Result<(), DeleteError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoopSink(Mutex<Vec<AuditEvent>>);
    impl EventSink for NoopSink {
        fn emit(&self, event: AuditEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn node(name: &str, memory_pressure: bool) -> NodeObject {
        NodeObject {
            name: name.to_string(),
            unschedulable: false,
            tainted: false,
            terminating: false,
            conditions: NodeConditions {
                ready: true,
                memory_pressure,
                ..Default::default()
            },
            allocatable: ResourceQuantity {
                millicpu: 1000,
                memory_bytes: 1 << 30,
            },
        }
    }

    /// First yields the bad node and the initial-sync marker, then — after a delay meant to land
    /// in the middle of a slow rebalancing pass — a second node, to prove live events keep
    /// flowing while a pass is in flight.
    struct DelayedLateNodeWatcher;
    impl EventWatcher for DelayedLateNodeWatcher {
        fn watch(&self) -> BoxStream<'static, WatchEvent> {
            let warmup = stream::iter(vec![WatchEvent::NodeUpserted(node("bad", true)), WatchEvent::InitialSyncComplete]);
            let late = stream::once(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                WatchEvent::NodeUpserted(node("late", false))
            });
            warmup.chain(late).boxed()
        }
    }

    struct OneShotLister;
    #[async_trait]
    impl WorkloadLister for OneShotLister {
        async fn list_workloads(&self) -> anyhow::Result<Vec<WorkloadObject>> {
            Ok(vec![WorkloadObject {
                key: WorkloadKey {
                    namespace: "default".to_string(),
                    name: "w".to_string(),
                },
                node_name: "bad".to_string(),
                owner: Some(OwnerRef {
                    kind: OwnerRef::STATELESS_REPLICA_CONTROLLER.to_string(),
                    name: "rs".to_string(),
                }),
                deletion_timestamp: None,
                has_affinity: false,
                node_selector: Default::default(),
                requested: ResourceQuantity::default(),
            }])
        }
    }

    /// Sleeps long enough for a pass to still be in flight when the late event above arrives.
    struct SlowDeleter;
    #[async_trait]
    impl WorkloadDeleter for SlowDeleter {
        async fn delete_workload(&self, _key: &WorkloadKey) -> Result<(), DeleteError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn live_events_are_applied_while_a_pass_is_in_flight() {
        let controller = Controller::new(
            Arc::new(DelayedLateNodeWatcher),
            Arc::new(OneShotLister),
            Arc::new(SlowDeleter),
            Arc::new(NoopSink(Mutex::new(Vec::new()))),
            Duration::from_millis(10),
            1.0,
        );
        let cache = controller.cache_handle();
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(controller.run(rx));

        // The deleter alone blocks a pass for 300ms; the late node event lands at ~50ms. If event
        // dispatch were still sharing the same `select!` as the ticker, it would only be observed
        // once the in-flight pass finishes. Give it time to land, independent of the pass.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.node_count(), 2, "live event should be applied without waiting on the in-flight pass");

        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok(), "controller did not shut down in time");
    }

    #[tokio::test]
    async fn shutdown_signal_stops_the_loop_promptly() {
        let controller = Controller::new(
            Arc::new(EmptyWatcher),
            Arc::new(EmptyLister),
            Arc::new(NoopDeleter(AtomicUsize::new(0))),
            Arc::new(NoopSink(Mutex::new(Vec::new()))),
            Duration::from_secs(3600),
            2.0,
        );
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(controller.run(rx));
        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok(), "controller did not shut down in time");
    }
}
