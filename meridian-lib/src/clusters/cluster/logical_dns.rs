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

use super::{cluster_resolver, ClusterCore, ClusterDeps, ClusterInfo, ClusterOps, ClusterStats, InitializePhase};
use crate::{
    clusters::{
        balancers::LoadBalancerContext,
        host::{Host, HostRef, HostSet, MemberUpdateCb, MemberUpdateCbHandle},
        ClusterError,
    },
    transport::ResolveHost,
};
use compact_str::CompactString;
use meridian_configuration::config::cluster::Cluster as ClusterConfig;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// A single synthetic host whose address tracks the first answer for one
/// hostname. Resolution churn swaps the address; consumers keep addressing
/// the cluster through that one logical endpoint.
#[derive(Clone)]
pub struct LogicalDnsCluster {
    core: ClusterCore,
    hostname: CompactString,
    port: u16,
    resolver: Arc<dyn ResolveHost>,
    refresh_interval: Duration,
    stop: Arc<Notify>,
    started: Arc<AtomicBool>,
    validation: bool,
}

impl LogicalDnsCluster {
    pub(super) fn build(core: ClusterCore, config: &ClusterConfig, deps: &ClusterDeps) -> Result<Self, ClusterError> {
        // Config validation pinned this to exactly one host.
        let (hostname, port) = config.hosts[0]
            .parse()
            .map_err(|url| ClusterError::Configuration(format!("invalid host url \"{url}\"")))?;
        Ok(Self {
            core,
            hostname,
            port,
            resolver: cluster_resolver(config, deps),
            refresh_interval: config.dns_refresh_rate(),
            stop: Arc::new(Notify::new()),
            started: Arc::new(AtomicBool::new(false)),
            validation: deps.validation,
        })
    }

    pub(crate) async fn resolve_once(&self) {
        match self.resolver.resolve(&self.hostname).await {
            Ok(ips) => match ips.first() {
                Some(ip) => {
                    let address = SocketAddr::new(*ip, self.port);
                    let current = self.core.snapshot();
                    if !current.contains_address(address) {
                        debug!("cluster {}: logical host now {address}", self.core.info.name);
                        self.core.update_hosts(vec![Host::new(
                            self.core.info.name.clone(),
                            self.hostname.clone(),
                            address,
                        )]);
                    }
                },
                None => warn!("cluster {}: {} resolved to no addresses", self.core.info.name, self.hostname),
            },
            Err(err) => warn!("cluster {}: {err}", self.core.info.name),
        }
        self.core.mark_initialized();
    }

    fn spawn_refresh_loop(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                this.resolve_once().await;
                tokio::select! {
                    _ = this.stop.notified() => break,
                    _ = tokio::time::sleep(this.refresh_interval) => {},
                }
            }
        });
    }
}

impl ClusterOps for LogicalDnsCluster {
    fn info(&self) -> &Arc<ClusterInfo> {
        &self.core.info
    }

    fn initialize_phase(&self) -> InitializePhase {
        InitializePhase::Primary
    }

    fn initialize(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.validation {
            self.core.mark_initialized();
            return;
        }
        self.spawn_refresh_loop();
    }

    fn host_set(&self) -> Arc<HostSet> {
        self.core.snapshot()
    }

    fn host_set_version(&self) -> usize {
        self.core.version()
    }

    fn set_initialized_cb(&self, cb: Box<dyn FnOnce() + Send>) {
        self.core.set_initialized_cb(cb);
    }

    fn add_member_update_cb(&self, cb: MemberUpdateCb) -> MemberUpdateCbHandle {
        self.core.add_member_update_cb(cb)
    }

    fn choose_host(&self, ctx: &LoadBalancerContext) -> Option<HostRef> {
        self.core.choose(ctx)
    }

    fn update_health(&self, address: SocketAddr, healthy: bool) -> bool {
        self.core.update_health(address, healthy)
    }

    fn stats(&self) -> &ClusterStats {
        self.core.stats()
    }

    fn shutdown(&self) {
        self.stop.notify_waiters();
    }
}

impl std::fmt::Debug for LogicalDnsCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalDnsCluster")
            .field("name", &self.core.info.name)
            .field("hostname", &self.hostname)
            .finish()
    }
}
