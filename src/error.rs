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

use thiserror::Error;

pub type RebalancerResult<T> = std::result::Result<T, RebalancerError>;

/// Startup-fatal configuration and wiring errors. `resbalancer::main` logs these and exits
/// non-zero; nothing in the control loop is expected to recover from them.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("ratio must be >= 1.0, got {0}")]
    RatioTooSmall(f64),
    #[error("could not resolve kubeconfig: {0}")]
    KubeconfigUnresolvable(String),
}

/// Errors that can surface out of a single rebalancing pass.
///
/// Per-workload and per-node errors (a scoring glitch, a delete failure other than "not found")
/// are intentionally *not* represented here: the rebalancer swallows those, emits a log line or
/// a [`crate::client::AuditEvent`], and moves on to the next item. `RebalanceError` is reserved
/// for failures that make the whole pass meaningless.
#[derive(Error, Debug)]
pub enum RebalanceError {
    #[error("no scorable nodes: the Scorer failed for every node in the cluster")]
    NoScorableNodes,
}

#[derive(Error, Debug)]
pub enum RebalancerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Rebalance(#[from] RebalanceError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
