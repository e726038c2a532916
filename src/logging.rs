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

//! Logger setup for the `resbalancer` binary, trimmed down from the full RisingWave runtime
//! logger (no Jaeger export, no tokio-console, no pprof): a single `fmt` layer over stderr with
//! per-target filtering driven by `-v`/`-q`.

use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

/// Maps a net verbosity delta (positive from `-v`, negative from `-q`) to a base level for this
/// crate's own targets. Third-party crates stay capped at `WARN` regardless of verbosity, mirroring
/// how the full runtime logger keeps noisy dependencies quiet.
fn base_level(verbosity: i16) -> Level {
    match verbosity {
        i16::MIN..=-1 => Level::ERROR,
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initializes the global `tracing` subscriber. Must be called exactly once, before any other
/// `tracing` calls; `resbalancer::main` is the only caller.
pub fn init(verbosity: i16) {
    let level = base_level(verbosity);

    let targets = Targets::new()
        .with_target("resbalancer", level)
        .with_target("hyper", Level::WARN)
        .with_target("h2", Level::WARN)
        .with_target("tower", Level::WARN)
        .with_target("kube", Level::WARN)
        .with_default(Level::WARN);

    let fmt_layer = tracing_subscriber::fmt::layer().compact().with_target(true).with_ansi(console_colors_enabled());

    tracing_subscriber::registry().with(fmt_layer).with(targets).init();
}

fn console_colors_enabled() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}
