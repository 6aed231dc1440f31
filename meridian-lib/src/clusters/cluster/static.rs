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

use super::{ClusterCore, ClusterInfo, ClusterOps, ClusterStats, InitializePhase};
use crate::clusters::{
    balancers::LoadBalancerContext,
    host::{Host, HostRef, HostSet, MemberUpdateCb, MemberUpdateCbHandle},
    ClusterError,
};
use meridian_configuration::config::cluster::Cluster as ClusterConfig;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

/// Hosts fixed at construction; ready the moment `initialize` runs.
#[derive(Debug, Clone)]
pub struct StaticCluster {
    core: ClusterCore,
    initial: Arc<Vec<HostRef>>,
}

impl StaticCluster {
    pub(super) fn build(core: ClusterCore, config: &ClusterConfig) -> Result<Self, ClusterError> {
        let mut initial = Vec::with_capacity(config.hosts.len());
        for host_url in &config.hosts {
            let (hostname, port) = host_url
                .parse()
                .map_err(|url| ClusterError::Configuration(format!("invalid host url \"{url}\"")))?;
            let ip: IpAddr = hostname.parse().map_err(|_| {
                ClusterError::Configuration(format!(
                    "static cluster \"{}\" requires IP addresses, got \"{hostname}\"",
                    config.name
                ))
            })?;
            initial.push(Host::new(config.name.clone(), hostname, SocketAddr::new(ip, port)));
        }
        Ok(Self { core, initial: Arc::new(initial) })
    }
}

impl ClusterOps for StaticCluster {
    fn info(&self) -> &Arc<ClusterInfo> {
        &self.core.info
    }

    fn initialize_phase(&self) -> InitializePhase {
        InitializePhase::Primary
    }

    fn initialize(&self) {
        self.core.update_hosts(self.initial.as_ref().clone());
        self.core.mark_initialized();
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

    fn shutdown(&self) {}
}
