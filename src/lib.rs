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

//! `resbalancer`: watches worker nodes and stateless workloads in a Kubernetes-like cluster,
//! scores nodes the way the scheduler would, and evicts workloads off statistically overloaded
//! nodes so the scheduler re-places them onto healthier ones.
//!
//! The hard core (`cache`, `scorer`, `node_ext`, `distribution`, `rebalancer`) depends only on the
//! trait contracts in `client`, so it can be exercised without a live cluster; `kube_adapter` is
//! the one concrete binding to a real orchestrator.

pub mod cache;
pub mod client;
pub mod config;
pub mod controller;
pub mod distribution;
pub mod error;
pub mod kube_adapter;
pub mod logging;
pub mod node_ext;
pub mod rebalancer;
pub mod scorer;
