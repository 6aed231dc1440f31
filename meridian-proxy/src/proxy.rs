// SPDX-FileCopyrightText: © 2025 Huawei Cloud Computing Technologies Co., Ltd
// SPDX-License-Identifier: Apache-2.0
//
// Copyright 2025 Huawei Cloud Computing Technologies Co., Ltd
//
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

use crate::runtime::build_tokio_runtime;
use meridian_configuration::{config::Config, options::Options};
use meridian_lib::{ClusterManager, Result, SystemDnsResolver};
use meridian_metrics::Registry;
use meridian_xds::{CdsApi, FilesystemSubscription, SubscriptionStats};
use std::sync::Arc;
use tracing::info;

/// Construct everything a serve run would construct, without spawning a
/// single task, watcher, or socket. Succeeding here means serve-mode
/// construction would have succeeded.
pub fn validate(config: &Config) -> Result<()> {
    let registry = Registry::new();
    let manager = ClusterManager::new(
        &config.bootstrap.cluster_manager,
        registry,
        Arc::new(SystemDnsResolver::new(Vec::new())),
        true,
    )?;
    manager.complete_static_load();
    info!("configuration is valid");
    Ok(())
}

pub fn serve(config: Config, options: &Options) -> Result<()> {
    let concurrency = options.concurrency.map(usize::from).unwrap_or_else(num_cpus::get);
    let runtime = build_tokio_runtime("meridian", concurrency);

    runtime.block_on(async move {
        let registry = Registry::new();
        let manager = ClusterManager::new(
            &config.bootstrap.cluster_manager,
            registry.clone(),
            Arc::new(SystemDnsResolver::new(Vec::new())),
            false,
        )?;

        if let Some(cds_config) = &config.bootstrap.cluster_manager.cds {
            let Some(path) = &cds_config.path else {
                return Err("only filesystem cds sources are wired in this build".into());
            };
            let stats = SubscriptionStats::new(&registry.scope("cluster_manager.cds."));
            let subscription = FilesystemSubscription::new(path.clone(), stats);
            let cds = Arc::new(CdsApi::new(manager.clone(), Box::new(subscription)));
            manager.set_cds(cds);
        }

        manager.set_initialized_cb(Box::new(|| info!("all clusters initialized")));
        manager.complete_static_load();

        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        manager.shutdown();
        Ok(())
    })
}
