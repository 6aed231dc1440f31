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
use meridian_configuration::config::cluster::ClusterLoadAssignment;
use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Membership arrives from an endpoint discovery subscription. Secondary:
/// the subscription itself runs over some Primary cluster, so warm-up waits
/// for the first pushed assignment, empty or not.
#[derive(Debug, Clone)]
pub struct EdsCluster {
    core: ClusterCore,
    initialize_called: Arc<AtomicBool>,
    assignment_seen: Arc<AtomicBool>,
}

impl EdsCluster {
    pub(super) fn build(core: ClusterCore) -> Self {
        Self {
            core,
            initialize_called: Arc::new(AtomicBool::new(false)),
            assignment_seen: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Apply a pushed endpoint set. Completes warm-up once both this and
    /// `initialize` have happened, in either order.
    pub(crate) fn apply_assignment(&self, assignment: &ClusterLoadAssignment) {
        let mut hosts: Vec<HostRef> = Vec::with_capacity(assignment.endpoints.len());
        let mut unhealthy: HashSet<SocketAddr> = HashSet::new();
        for endpoint in &assignment.endpoints {
            if !endpoint.health_status.is_healthy() {
                unhealthy.insert(endpoint.address);
            }
            hosts.push(Host::with_metadata(
                self.core.info.name.clone(),
                "",
                endpoint.address,
                endpoint.canary,
                endpoint.load_balancing_weight,
                endpoint.zone.clone(),
            ));
        }
        self.core.replace_unhealthy(unhealthy);
        self.core.update_hosts(hosts);
        self.assignment_seen.store(true, Ordering::Release);
        if self.initialize_called.load(Ordering::Acquire) {
            self.core.mark_initialized();
        }
    }
}

impl ClusterOps for EdsCluster {
    fn info(&self) -> &Arc<ClusterInfo> {
        &self.core.info
    }

    fn initialize_phase(&self) -> InitializePhase {
        InitializePhase::Secondary
    }

    fn initialize(&self) {
        self.initialize_called.store(true, Ordering::Release);
        if self.assignment_seen.load(Ordering::Acquire) {
            self.core.mark_initialized();
        }
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
