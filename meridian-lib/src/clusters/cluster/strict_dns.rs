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

/// Every hostname in the target list is re-resolved on a timer; each round's
/// full result replaces the membership and the diff goes out to the
/// member-update callbacks. The initialize callback waits for the first
/// round to finish, successfully or not.
#[derive(Clone)]
pub struct StrictDnsCluster {
    core: ClusterCore,
    targets: Arc<Vec<(CompactString, u16)>>,
    resolver: Arc<dyn ResolveHost>,
    refresh_interval: Duration,
    stop: Arc<Notify>,
    started: Arc<AtomicBool>,
    validation: bool,
}

impl StrictDnsCluster {
    pub(super) fn build(core: ClusterCore, config: &ClusterConfig, deps: &ClusterDeps) -> Result<Self, ClusterError> {
        let mut targets = Vec::with_capacity(config.hosts.len());
        for host_url in &config.hosts {
            let target = host_url
                .parse()
                .map_err(|url| ClusterError::Configuration(format!("invalid host url \"{url}\"")))?;
            targets.push(target);
        }
        Ok(Self {
            core,
            targets: Arc::new(targets),
            resolver: cluster_resolver(config, deps),
            refresh_interval: config.dns_refresh_rate(),
            stop: Arc::new(Notify::new()),
            started: Arc::new(AtomicBool::new(false)),
            validation: deps.validation,
        })
    }

    /// One resolution round: resolve every target, replace membership with
    /// the union, and fire the initialize callback if this was the first
    /// round. A target that fails to resolve keeps its previous hosts.
    pub(crate) async fn resolve_once(&self) {
        let current = self.core.snapshot();
        let mut new_hosts: Vec<HostRef> = Vec::new();
        for (hostname, port) in self.targets.iter() {
            match self.resolver.resolve(hostname).await {
                Ok(ips) => {
                    debug!("cluster {}: {} resolved to {} addresses", self.core.info.name, hostname, ips.len());
                    for ip in ips {
                        new_hosts.push(Host::new(
                            self.core.info.name.clone(),
                            hostname.clone(),
                            SocketAddr::new(ip, *port),
                        ));
                    }
                },
                Err(err) => {
                    warn!("cluster {}: {err}", self.core.info.name);
                    new_hosts.extend(current.hosts.iter().filter(|h| h.hostname == *hostname).cloned());
                },
            }
        }
        self.core.update_hosts(new_hosts);
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
            debug!("cluster {}: dns refresh loop stopped", this.core.info.name);
        });
    }
}

impl ClusterOps for StrictDnsCluster {
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

impl std::fmt::Debug for StrictDnsCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrictDnsCluster")
            .field("name", &self.core.info.name)
            .field("targets", &self.targets)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        clusters::cluster::PartialCluster,
        transport::ResolveError,
    };
    use futures::{future::BoxFuture, FutureExt};
    use meridian_configuration::config::cluster::{DiscoveryType, HostUrl, LbPolicy};
    use meridian_metrics::Registry;
    use parking_lot::Mutex;
    use std::{collections::HashMap, net::IpAddr, sync::atomic::AtomicUsize};

    /// Scripted resolver: each hostname maps to a fixed answer that tests
    /// swap between rounds.
    #[derive(Default)]
    pub(crate) struct ScriptedResolver {
        answers: Mutex<HashMap<String, Result<Vec<IpAddr>, String>>>,
    }

    impl ScriptedResolver {
        pub(crate) fn answer(&self, host: &str, ips: &[&str]) {
            self.answers
                .lock()
                .insert(host.to_owned(), Ok(ips.iter().map(|ip| ip.parse().unwrap()).collect()));
        }

        pub(crate) fn fail(&self, host: &str, reason: &str) {
            self.answers.lock().insert(host.to_owned(), Err(reason.to_owned()));
        }
    }

    impl ResolveHost for ScriptedResolver {
        fn resolve(&self, host: &str) -> BoxFuture<'static, Result<Vec<IpAddr>, ResolveError>> {
            let answer = self.answers.lock().get(host).cloned();
            let host = host.to_owned();
            async move {
                match answer {
                    Some(Ok(ips)) => Ok(ips),
                    Some(Err(reason)) => Err(ResolveError { host, reason }),
                    None => Ok(Vec::new()),
                }
            }
            .boxed()
        }
    }

    pub(crate) fn dns_config(name: &str, hosts: &[&str]) -> ClusterConfig {
        ClusterConfig {
            name: name.into(),
            discovery: DiscoveryType::StrictDns,
            connect_timeout_ms: 250,
            lb_type: LbPolicy::default(),
            hosts: hosts.iter().map(|h| HostUrl::new(format!("tcp://{h}"))).collect(),
            per_connection_buffer_limit_bytes: None,
            dns_resolvers: Vec::new(),
            dns_refresh_rate: None,
            health_check: None,
            outlier_detection: None,
        }
    }

    pub(crate) fn build_dns_cluster(name: &str, hosts: &[&str], resolver: Arc<ScriptedResolver>) -> StrictDnsCluster {
        let deps = ClusterDeps { resolver, stats: Registry::new().scope(""), validation: false };
        let built = PartialCluster::try_new(dns_config(name, hosts), false).unwrap().build(&deps).unwrap();
        match built {
            crate::clusters::cluster::ClusterType::StrictDns(cluster) => cluster,
            other => panic!("expected strict dns cluster, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_resolution_fires_initialize() {
        let resolver = Arc::new(ScriptedResolver::default());
        resolver.answer("localhost", &["127.0.0.1", "127.0.0.2"]);
        let cluster = build_dns_cluster("cluster_1", &["localhost:11001"], resolver);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        cluster.set_initialized_cb(Box::new(move || {
            fired2.fetch_add(1, Ordering::Relaxed);
        }));

        cluster.resolve_once().await;
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert_eq!(cluster.host_set().hosts.len(), 2);

        // Later rounds do not re-fire.
        cluster.resolve_once().await;
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn failed_resolution_still_initializes_with_zero_hosts() {
        let resolver = Arc::new(ScriptedResolver::default());
        resolver.fail("nowhere.invalid", "servfail");
        let cluster = build_dns_cluster("cluster_1", &["nowhere.invalid:11001"], resolver);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        cluster.set_initialized_cb(Box::new(move || {
            fired2.fetch_add(1, Ordering::Relaxed);
        }));

        cluster.resolve_once().await;
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert!(cluster.host_set().hosts.is_empty());
    }

    #[tokio::test]
    async fn rounds_emit_membership_diffs() {
        let resolver = Arc::new(ScriptedResolver::default());
        resolver.answer("localhost", &["127.0.0.1", "127.0.0.2"]);
        let cluster = build_dns_cluster("cluster_1", &["localhost:11001"], Arc::clone(&resolver));
        cluster.resolve_once().await;

        let diffs = Arc::new(Mutex::new(Vec::new()));
        let diffs2 = Arc::clone(&diffs);
        let _handle = cluster.add_member_update_cb(Arc::new(move |added, removed| {
            diffs2.lock().push((added.len(), removed.len()));
        }));

        resolver.answer("localhost", &["127.0.0.2"]);
        cluster.resolve_once().await;
        assert_eq!(diffs.lock().as_slice(), &[(0, 1)]);
        assert_eq!(cluster.host_set().hosts.len(), 1);
        assert_eq!(cluster.host_set().hosts[0].address, "127.0.0.2:11001".parse().unwrap());
    }

    #[tokio::test]
    async fn resolution_failure_keeps_previous_hosts() {
        let resolver = Arc::new(ScriptedResolver::default());
        resolver.answer("localhost", &["127.0.0.1"]);
        let cluster = build_dns_cluster("cluster_1", &["localhost:11001"], Arc::clone(&resolver));
        cluster.resolve_once().await;
        assert_eq!(cluster.host_set().hosts.len(), 1);

        resolver.fail("localhost", "timeout");
        cluster.resolve_once().await;
        assert_eq!(cluster.host_set().hosts.len(), 1);
    }
}
