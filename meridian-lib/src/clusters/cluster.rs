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

mod eds;
mod logical_dns;
mod original_dst;
mod r#static;
pub(crate) mod strict_dns;

pub use eds::EdsCluster;
pub use logical_dns::LogicalDnsCluster;
pub use original_dst::OriginalDstCluster;
pub use r#static::StaticCluster;
pub use strict_dns::StrictDnsCluster;

use crate::{
    clusters::{
        balancers::{BalancerType, LoadBalancerContext},
        host::{HostRef, HostSet, HostSetWatch, MemberUpdateCb, MemberUpdateCbHandle, MemberUpdateCbs},
        ClusterError,
    },
    transport::{ResolveHost, SystemDnsResolver, TcpConnector},
};
use compact_str::CompactString;
use enum_dispatch::enum_dispatch;
use meridian_configuration::config::cluster::{Cluster as ClusterConfig, DiscoveryType, LbPolicy};
use meridian_metrics::{Counter, Scope};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    hash::{Hash, Hasher},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};
use tracing::debug;

/// Initialization ordering class. Secondary clusters source their membership
/// from a discovery service that itself runs over a Primary cluster, so they
/// only start initializing once every Primary is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializePhase {
    Primary,
    Secondary,
}

/// Immutable per-version cluster facts shared with pools and snapshots.
#[derive(Debug)]
pub struct ClusterInfo {
    pub name: CompactString,
    pub discovery: DiscoveryType,
    pub lb_policy: LbPolicy,
    pub connect_timeout: Duration,
    pub per_connection_buffer_limit: Option<usize>,
    pub added_via_api: bool,
    pub config_hash: u64,
    pub config: ClusterConfig,
}

impl ClusterInfo {
    pub fn connector_for(&self, address: SocketAddr) -> TcpConnector {
        TcpConnector::new(address, self.connect_timeout, self.per_connection_buffer_limit)
    }
}

#[derive(Debug, Clone)]
pub struct ClusterStats {
    pub upstream_cx_none_healthy: Counter,
    pub lb_local_cluster_update: Counter,
}

impl ClusterStats {
    fn new(scope: &Scope) -> Self {
        Self {
            upstream_cx_none_healthy: scope.counter("upstream_cx_none_healthy"),
            lb_local_cluster_update: scope.counter("lb_local_cluster_update"),
        }
    }
}

/// The capability set every cluster variant exposes. Everything else about a
/// variant (timers, subscriptions, on-demand host creation) stays private to
/// it.
#[enum_dispatch]
pub trait ClusterOps {
    fn info(&self) -> &Arc<ClusterInfo>;
    fn initialize_phase(&self) -> InitializePhase;
    /// Begin whatever work readiness requires. The initialize callback fires
    /// exactly once, possibly synchronously from inside this call, and fires
    /// even if the cluster never learns a single host.
    fn initialize(&self);
    fn host_set(&self) -> Arc<HostSet>;
    fn host_set_version(&self) -> usize;
    fn set_initialized_cb(&self, cb: Box<dyn FnOnce() + Send>);
    fn add_member_update_cb(&self, cb: MemberUpdateCb) -> MemberUpdateCbHandle;
    fn choose_host(&self, ctx: &LoadBalancerContext) -> Option<HostRef>;
    /// Returns whether this was an actual transition.
    fn update_health(&self, address: SocketAddr, healthy: bool) -> bool;
    fn stats(&self) -> &ClusterStats;
    /// Stop background work. Pools referencing this cluster drain on their
    /// own schedule.
    fn shutdown(&self);
}

#[derive(Debug, Clone)]
#[enum_dispatch(ClusterOps)]
pub enum ClusterType {
    Static(StaticCluster),
    StrictDns(StrictDnsCluster),
    LogicalDns(LogicalDnsCluster),
    Eds(EdsCluster),
    OriginalDst(OriginalDstCluster),
}

/// A validated, hashed descriptor: the checkpoint between "config accepted"
/// and "runtime object built". The hash is what add-or-update uses to
/// short-circuit no-op pushes.
#[derive(Debug, Clone)]
pub struct PartialCluster {
    config: ClusterConfig,
    hash: u64,
    added_via_api: bool,
}

/// Everything cluster construction borrows from its surroundings.
pub struct ClusterDeps {
    pub resolver: Arc<dyn ResolveHost>,
    pub stats: Scope,
    /// Validation mode: construct fully, but never spawn tasks or sockets.
    pub validation: bool,
}

impl PartialCluster {
    pub fn try_new(config: ClusterConfig, added_via_api: bool) -> Result<Self, ClusterError> {
        config.validate().map_err(|e| ClusterError::Configuration(e.to_string()))?;
        let hash = hash_config(&config);
        Ok(Self { config, hash, added_via_api })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn build(self, deps: &ClusterDeps) -> Result<ClusterType, ClusterError> {
        let PartialCluster { config, hash, added_via_api } = self;
        debug!("Cluster {} type {:?}", config.name, config.discovery);
        let info = Arc::new(ClusterInfo {
            name: config.name.clone(),
            discovery: config.discovery,
            lb_policy: config.lb_type,
            connect_timeout: config.connect_timeout(),
            per_connection_buffer_limit: config.per_connection_buffer_limit_bytes,
            added_via_api,
            config_hash: hash,
            config: config.clone(),
        });
        let scope = deps.stats.scope(&format!("cluster.{}.", info.name));
        let core = ClusterCore::new(info, &scope);

        match config.discovery {
            DiscoveryType::Static => Ok(ClusterType::Static(StaticCluster::build(core, &config)?)),
            DiscoveryType::StrictDns => {
                Ok(ClusterType::StrictDns(StrictDnsCluster::build(core, &config, deps)?))
            },
            DiscoveryType::LogicalDns => {
                Ok(ClusterType::LogicalDns(LogicalDnsCluster::build(core, &config, deps)?))
            },
            DiscoveryType::Eds => Ok(ClusterType::Eds(EdsCluster::build(core))),
            DiscoveryType::OriginalDst => Ok(ClusterType::OriginalDst(OriginalDstCluster::build(core))),
        }
    }
}

fn hash_config(config: &ClusterConfig) -> u64 {
    // DefaultHasher is keyed deterministically, so equal descriptors hash
    // equal across manager instances in one build.
    let serialized = serde_yaml::to_string(config).unwrap_or_default();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    serialized.hash(&mut hasher);
    hasher.finish()
}

fn cluster_resolver(config: &ClusterConfig, deps: &ClusterDeps) -> Arc<dyn ResolveHost> {
    if config.dns_resolvers.is_empty() {
        Arc::clone(&deps.resolver)
    } else {
        Arc::new(SystemDnsResolver::new(config.dns_resolvers.clone()))
    }
}

enum InitCbState {
    Waiting(Option<Box<dyn FnOnce() + Send>>),
    Done,
}

/// One-shot readiness callback slot.
struct InitCallbackSlot {
    state: Mutex<InitCbState>,
}

impl InitCallbackSlot {
    fn new() -> Self {
        Self { state: Mutex::new(InitCbState::Waiting(None)) }
    }

    fn set(&self, cb: Box<dyn FnOnce() + Send>) {
        let fire_now = {
            let mut state = self.state.lock();
            match &mut *state {
                InitCbState::Waiting(slot) => {
                    if slot.is_some() {
                        debug!("replacing a pending initialize callback");
                    }
                    *slot = Some(cb);
                    return;
                },
                InitCbState::Done => true,
            }
        };
        if fire_now {
            cb();
        }
    }

    fn fire(&self) {
        let cb = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, InitCbState::Done) {
                InitCbState::Waiting(cb) => cb,
                InitCbState::Done => None,
            }
        };
        if let Some(cb) = cb {
            cb();
        }
    }
}

impl std::fmt::Debug for InitCallbackSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.lock() {
            InitCbState::Waiting(_) => "waiting",
            InitCbState::Done => "done",
        };
        f.write_str(state)
    }
}

/// State shared by every variant: identity, membership publication, the
/// member-update callback list, the one-shot init callback, and stats.
/// Cloning a variant clones `Arc`s, so all clones observe one cluster.
#[derive(Debug, Clone)]
pub(crate) struct ClusterCore {
    pub info: Arc<ClusterInfo>,
    hosts: Arc<HostSetWatch>,
    member_cbs: Arc<MemberUpdateCbs>,
    init_cb: Arc<InitCallbackSlot>,
    balancer: Arc<BalancerType>,
    unhealthy: Arc<Mutex<HashSet<SocketAddr>>>,
    stats: ClusterStats,
}

impl ClusterCore {
    fn new(info: Arc<ClusterInfo>, scope: &Scope) -> Self {
        let balancer = Arc::new(BalancerType::for_policy(info.lb_policy));
        Self {
            info,
            hosts: Arc::new(HostSetWatch::new()),
            member_cbs: Arc::new(MemberUpdateCbs::default()),
            init_cb: Arc::new(InitCallbackSlot::new()),
            balancer,
            unhealthy: Arc::new(Mutex::new(HashSet::new())),
            stats: ClusterStats::new(scope),
        }
    }

    pub fn snapshot(&self) -> Arc<HostSet> {
        self.hosts.snapshot()
    }

    pub fn version(&self) -> usize {
        self.hosts.version()
    }

    pub fn stats(&self) -> &ClusterStats {
        &self.stats
    }

    pub fn set_initialized_cb(&self, cb: Box<dyn FnOnce() + Send>) {
        self.init_cb.set(cb);
    }

    pub fn mark_initialized(&self) {
        self.init_cb.fire();
    }

    pub fn add_member_update_cb(&self, cb: MemberUpdateCb) -> MemberUpdateCbHandle {
        self.member_cbs.add(cb)
    }

    pub fn choose(&self, ctx: &LoadBalancerContext) -> Option<HostRef> {
        self.balancer.choose(&self.snapshot(), ctx)
    }

    /// Replace membership. Hosts already present (by address) keep their
    /// existing `Arc` identity so pools keyed on them survive; the rest are
    /// diffed into `(added, removed)` for the member-update callbacks, which
    /// run after the new snapshot is visible.
    pub fn update_hosts(&self, new_hosts: Vec<HostRef>) {
        let current = self.snapshot();
        let mut final_hosts: Vec<HostRef> = Vec::with_capacity(new_hosts.len());
        let mut added: Vec<HostRef> = Vec::new();
        for host in new_hosts {
            if final_hosts.iter().any(|h| h.address == host.address) {
                continue;
            }
            match current.find(host.address) {
                Some(existing) => final_hosts.push(Arc::clone(existing)),
                None => {
                    added.push(Arc::clone(&host));
                    final_hosts.push(host);
                },
            }
        }
        let removed: Vec<HostRef> = current
            .hosts
            .iter()
            .filter(|h| !final_hosts.iter().any(|n| n.address == h.address))
            .cloned()
            .collect();

        // Health state dies with the host: an address that leaves and later
        // comes back starts healthy until it is checked again.
        if !removed.is_empty() {
            let mut unhealthy = self.unhealthy.lock();
            for host in &removed {
                unhealthy.remove(&host.address);
            }
        }

        self.publish(final_hosts);
        if !added.is_empty() || !removed.is_empty() {
            self.member_cbs.run(&added, &removed);
        }
    }

    /// Flip one endpoint's health and repartition. Membership is unchanged,
    /// so member-update callbacks stay quiet.
    pub fn update_health(&self, address: SocketAddr, healthy: bool) -> bool {
        let changed = {
            let mut unhealthy = self.unhealthy.lock();
            if healthy {
                unhealthy.remove(&address)
            } else {
                unhealthy.insert(address)
            }
        };
        if changed {
            self.publish(self.snapshot().hosts.clone());
        }
        changed
    }

    /// Wholesale replacement of the unhealthy partition (endpoint updates
    /// that carry health state). Followed by `update_hosts`.
    pub fn replace_unhealthy(&self, addresses: HashSet<SocketAddr>) {
        *self.unhealthy.lock() = addresses;
    }

    fn publish(&self, hosts: Vec<HostRef>) {
        let unhealthy = self.unhealthy.lock();
        let healthy = hosts.iter().filter(|h| !unhealthy.contains(&h.address)).cloned().collect();
        drop(unhealthy);
        self.hosts.publish(HostSet::new(hosts, healthy));
    }
}
