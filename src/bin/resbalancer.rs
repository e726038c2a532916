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

use std::sync::Arc;

use clap::Parser;
use resbalancer::config::RebalancerOpts;
use resbalancer::controller::Controller;
use resbalancer::kube_adapter::{KubeAdapter, TracingEventSink};
use tokio::sync::oneshot;

#[tokio::main]
async fn main() {
    let opts = RebalancerOpts::parse();

    resbalancer::logging::init(opts.verbosity());

    if let Err(err) = opts.validate() {
        tracing::error!(error = %err, "invalid configuration");
        std::process::exit(1);
    }

    let return_code = match run(opts).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "resbalancer exited with an error");
            1
        }
    };
    std::process::exit(return_code);
}

async fn run(opts: RebalancerOpts) -> anyhow::Result<()> {
    let adapter = Arc::new(KubeAdapter::connect(opts.kubeconfig.as_deref()).await?);
    let event_sink = Arc::new(TracingEventSink);

    let controller = Controller::new(adapter.clone(), adapter.clone(), adapter, event_sink, opts.recycle_period, opts.ratio);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received interrupt, shutting down");
        let _ = shutdown_tx.send(());
    });

    controller.run(shutdown_rx).await
}
