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

//! Command-line configuration, following the same `clap::Parser` derive style used for the other
//! binaries in this tree (see `risingwave_cmd`'s `*Opts` structs).

use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

#[derive(Parser, Debug, Clone)]
#[command(name = "resbalancer", about = "Evicts workloads off statistically overloaded nodes so the scheduler can re-place them.")]
pub struct RebalancerOpts {
    /// Path to a kubeconfig file. Falls back to in-cluster config when unset.
    #[arg(short = 'c', long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// How often to run a rebalancing pass.
    #[arg(short = 'p', long, value_parser = parse_recycle_period, default_value = "2m")]
    pub recycle_period: Duration,

    /// Number of standard deviations away from the mean a node's score must be to count as an
    /// outlier. Must be >= 1.0.
    #[arg(short = 'r', long, default_value_t = 2.0)]
    pub ratio: f64,

    /// Increase log verbosity. Repeatable.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease log verbosity. Repeatable.
    #[arg(short = 'q', long, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

/// Accepts `humantime`'s duration syntax (`"30s"`, `"2m"`, `"1h 30m"`, ...) and unwraps it to a
/// plain `std::time::Duration` so the rest of the crate never needs to know about the wrapper
/// type.
fn parse_recycle_period(raw: &str) -> Result<Duration, humantime::DurationError> {
    raw.parse::<humantime::Duration>().map(Into::into)
}

impl RebalancerOpts {
    /// Validates constraints `clap` can't express directly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ratio < 1.0 {
            return Err(ConfigError::RatioTooSmall(self.ratio));
        }
        Ok(())
    }

    /// Net verbosity level: each `-v` raises it, each `-q` lowers it, relative to the default
    /// (`info`).
    pub fn verbosity(&self) -> i16 {
        self.verbose as i16 - self.quiet as i16
    }
}
