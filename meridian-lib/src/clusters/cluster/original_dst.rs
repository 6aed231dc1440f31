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
};
use parking_lot::Mutex;
use std::{net::SocketAddr, sync::Arc};
use tracing::debug;

/// Hosts materialize on demand from the downstream connection's original
/// destination. Ready immediately; membership only ever grows as new
/// destinations show up.
#[derive(Debug, Clone)]
pub struct OriginalDstCluster {
    core: ClusterCore,
    // Serializes host creation so two requests for a new destination do not
    // race a duplicate into the set.
    add_lock: Arc<Mutex<()>>,
}

impl OriginalDstCluster {
    pub(super) fn build(core: ClusterCore) -> Self {
        Self { core, add_lock: Arc::new(Mutex::new(())) }
    }

    fn host_for(&self, address: SocketAddr) -> HostRef {
        let _guard = self.add_lock.lock();
        let current = self.core.snapshot();
        if let Some(existing) = current.find(address) {
            return Arc::clone(existing);
        }
        debug!("cluster {}: new on-demand host {address}", self.core.info.name);
        let host = Host::new(self.core.info.name.clone(), "", address);
        let mut hosts = current.hosts.clone();
        hosts.push(Arc::clone(&host));
        self.core.update_hosts(hosts);
        host
    }
}

impl ClusterOps for OriginalDstCluster {
    fn info(&self) -> &Arc<ClusterInfo> {
        &self.core.info
    }

    fn initialize_phase(&self) -> InitializePhase {
        InitializePhase::Primary
    }

    fn initialize(&self) {
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
        let address = ctx.downstream_remote_address?;
        Some(self.host_for(address))
    }

    fn update_health(&self, address: SocketAddr, healthy: bool) -> bool {
        self.core.update_health(address, healthy)
    }

    fn stats(&self) -> &ClusterStats {
        self.core.stats()
    }

    fn shutdown(&self) {}
}
