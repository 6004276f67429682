// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use poem::endpoint::PrometheusExporter;
use poem::listener::TcpListener;
use prometheus::Registry;
use silo_common::tracing::init_tracing_with_default_env_filter;
use silo_import_service::config::{make_config_loader, ImportServiceConfig};
use silo_import_service::service::Services;
use silo_import_service::{api, metrics};
use tracing::info;

fn main() -> Result<(), std::io::Error> {
    if let Some(config) = make_config_loader().load_or_dump_config() {
        init_tracing_with_default_env_filter(&config.tracing);
        let prometheus = metrics::register_all();

        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(async_main(&config, prometheus))
    } else {
        Ok(())
    }
}

async fn async_main(
    config: &ImportServiceConfig,
    prometheus_registry: Registry,
) -> Result<(), std::io::Error> {
    let http_port = config.http_port;

    info!(
        "Starting import service on port {http_port} with {} worker nodes",
        config.worker_nodes.len()
    );

    let services = Services::new(config);

    let app = api::combined_routes(&services)
        .nest("/metrics", PrometheusExporter::new(prometheus_registry));

    poem::Server::new(TcpListener::bind(format!("0.0.0.0:{http_port}")))
        .run(app)
        .await
}
