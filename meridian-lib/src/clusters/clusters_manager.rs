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

use super::{
    cached_watch::{CachedWatch, CachedWatcher},
    cluster::{ClusterDeps, ClusterOps, ClusterStats, ClusterType, PartialCluster},
    conn_pool::{AsyncClient, HttpConnPool, ResourcePriority},
    host::{HostRef, MemberUpdateCbHandle},
    init::{CdsDriver, ClusterInitHelper},
    outlier::OutlierEventLog,
    ClusterError,
};
use crate::{
    clusters::balancers::LoadBalancerContext,
    transport::{ResolveHost, TcpConnector},
};
use compact_str::CompactString;
use meridian_configuration::config::{
    bootstrap::ClusterManagerConfig,
    cluster::{Cluster as ClusterConfig, ClusterLoadAssignment},
};
use meridian_metrics::{Counter, Gauge, Registry, Scope};
use parking_lot::Mutex;
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    sync::Arc,
};
use tracing::{debug, info};

pub type ClustersMap = BTreeMap<CompactString, ClusterType>;

#[derive(Debug, Clone)]
struct ManagerStats {
    cluster_added: Counter,
    cluster_modified: Counter,
    cluster_removed: Counter,
    total_clusters: Gauge,
}

impl ManagerStats {
    fn new(scope: &Scope) -> Self {
        Self {
            cluster_added: scope.counter("cluster_added"),
            cluster_modified: scope.counter("cluster_modified"),
            cluster_removed: scope.counter("cluster_removed"),
            total_clusters: scope.gauge("total_clusters"),
        }
    }
}

struct PrimaryEntry {
    cluster: ClusterType,
    hash: u64,
    added_via_api: bool,
    /// Registration this cluster holds on the local cluster's membership.
    /// Dropped with the entry, which silences the callback even though the
    /// local cluster lives on.
    local_lb_guard: Option<MemberUpdateCbHandle>,
}

struct ManagerInner {
    watch: CachedWatch<ClustersMap>,
    primary: Mutex<BTreeMap<CompactString, PrimaryEntry>>,
    init_helper: ClusterInitHelper,
    stats: ManagerStats,
    registry: Registry,
    deps: ClusterDeps,
    local_cluster_name: Option<CompactString>,
    outlier_log: Option<OutlierEventLog>,
}

/// The authoritative cluster registry. All mutation entry points
/// (`add_or_update_primary_cluster`, `remove_primary_cluster`, endpoint and
/// health updates, the init hooks) belong to the main task; the data path
/// reads per-worker [`ThreadLocalClusterManager`] caches handed out by
/// [`ClusterManager::thread_local`].
#[derive(Clone)]
pub struct ClusterManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager").finish_non_exhaustive()
    }
}

impl ClusterManager {
    /// Install every static cluster (the `sds`/`cds` backing clusters
    /// first), then check the local-cluster constraint. After construction
    /// the caller optionally attaches a CDS driver with [`set_cds`] and must
    /// finish with [`complete_static_load`].
    ///
    /// [`set_cds`]: ClusterManager::set_cds
    /// [`complete_static_load`]: ClusterManager::complete_static_load
    pub fn new(
        config: &ClusterManagerConfig,
        registry: Registry,
        resolver: Arc<dyn ResolveHost>,
        validation: bool,
    ) -> Result<Self, ClusterError> {
        let outlier_log = match &config.outlier_detection {
            Some(outlier) if !validation => Some(OutlierEventLog::open(&outlier.event_log_path).map_err(|e| {
                ClusterError::Configuration(format!(
                    "cannot open outlier event log \"{}\": {e}",
                    outlier.event_log_path.display()
                ))
            })?),
            _ => None,
        };

        let stats_scope = registry.scope("cluster_manager.");
        let manager = Self {
            inner: Arc::new(ManagerInner {
                watch: CachedWatch::new(ClustersMap::new()),
                primary: Mutex::new(BTreeMap::new()),
                init_helper: ClusterInitHelper::new(),
                stats: ManagerStats::new(&stats_scope),
                registry: registry.clone(),
                deps: ClusterDeps { resolver, stats: registry.scope(""), validation },
                local_cluster_name: config.local_cluster_name.clone(),
                outlier_log,
            }),
        };

        if let Some(sds) = &config.sds {
            manager.load_static_cluster(sds.cluster.clone())?;
        }
        if let Some(cds) = &config.cds {
            if let Some(cluster) = &cds.cluster {
                manager.load_static_cluster(cluster.clone())?;
            }
        }
        for cluster in &config.clusters {
            manager.load_static_cluster(cluster.clone())?;
        }

        if let Some(local) = &manager.inner.local_cluster_name {
            if !manager.inner.primary.lock().contains_key(local) {
                return Err(ClusterError::Configuration(format!(
                    "local cluster \"{local}\" is not defined among the static clusters"
                )));
            }
            manager.wire_local_lb_callbacks();
        }

        Ok(manager)
    }

    fn load_static_cluster(&self, config: ClusterConfig) -> Result<(), ClusterError> {
        let partial = PartialCluster::try_new(config, false)?;
        let name: CompactString = partial.name().into();
        if self.inner.primary.lock().contains_key(&name) {
            return Err(ClusterError::DuplicateCluster(name));
        }
        let hash = partial.hash();
        let cluster = partial.build(&self.inner.deps)?;

        {
            let mut primary = self.inner.primary.lock();
            primary.insert(
                name.clone(),
                PrimaryEntry { cluster: cluster.clone(), hash, added_via_api: false, local_lb_guard: None },
            );
        }
        self.inner.watch.update(|map| {
            map.insert(name.clone(), cluster.clone());
        });
        self.inner.init_helper.add_cluster(Arc::new(cluster));
        self.inner.stats.cluster_added.inc();
        self.update_total_clusters();
        Ok(())
    }

    /// Register the zone-aware refresh every cluster keeps on the local
    /// cluster's membership. Runs once at construction; dynamic additions
    /// wire themselves in `add_or_update_primary_cluster`.
    fn wire_local_lb_callbacks(&self) {
        let Some(local_name) = &self.inner.local_cluster_name else { return };
        let mut primary = self.inner.primary.lock();
        let Some(local) = primary.get(local_name).map(|e| e.cluster.clone()) else { return };
        for (name, entry) in primary.iter_mut() {
            if name == local_name || entry.local_lb_guard.is_some() {
                continue;
            }
            entry.local_lb_guard = Some(local_membership_guard(&local, entry.cluster.stats()));
        }
    }

    /// Add a new cluster or replace an api-managed one.
    ///
    /// `Ok(false)` for a content-hash match or an attempt to touch a static
    /// cluster; `Err` when the descriptor fails validation or construction.
    /// A replaced cluster is shut down and its pools drain on the workers.
    pub fn add_or_update_primary_cluster(&self, config: ClusterConfig) -> Result<bool, ClusterError> {
        let partial = PartialCluster::try_new(config, true)?;
        let name: CompactString = partial.name().into();
        let hash = partial.hash();

        let (cluster, replaced) = {
            let mut primary = self.inner.primary.lock();
            if let Some(entry) = primary.get(&name) {
                if !entry.added_via_api {
                    debug!("cluster \"{name}\" is static and cannot be updated via api");
                    return Ok(false);
                }
                if entry.hash == hash {
                    debug!("cluster \"{name}\" unchanged (hash match)");
                    return Ok(false);
                }
            }
            let cluster = partial.build(&self.inner.deps)?;
            let local_lb_guard = self.local_guard_for(&primary, &name, cluster.stats());
            let replaced = primary.insert(
                name.clone(),
                PrimaryEntry { cluster: cluster.clone(), hash, added_via_api: true, local_lb_guard },
            );
            (cluster, replaced)
        };

        self.inner.watch.update(|map| {
            map.insert(name.clone(), cluster.clone());
        });

        if let Some(old) = &replaced {
            self.inner.init_helper.remove_cluster(&name);
            old.cluster.shutdown();
        }
        self.inner.init_helper.add_cluster(Arc::new(cluster));

        if replaced.is_some() {
            info!("updating cluster \"{name}\"");
            self.inner.stats.cluster_modified.inc();
        } else {
            info!("adding cluster \"{name}\"");
            self.inner.stats.cluster_added.inc();
        }
        self.update_total_clusters();
        Ok(true)
    }

    /// `true` iff an api-managed cluster was scheduled for drain. Static
    /// clusters and unknown names: `false`.
    pub fn remove_primary_cluster(&self, name: &str) -> bool {
        let removed = {
            let mut primary = self.inner.primary.lock();
            match primary.get(name) {
                Some(entry) if entry.added_via_api => primary.remove(name),
                _ => None,
            }
        };
        let Some(entry) = removed else {
            return false;
        };

        self.inner.init_helper.remove_cluster(name);
        self.inner.watch.update(|map| {
            map.remove(name);
        });
        entry.cluster.shutdown();
        self.inner.stats.cluster_removed.inc();
        self.update_total_clusters();
        info!("removing cluster \"{name}\"");
        true
        // `entry` drops here: its local-cluster callback guard goes with it.
    }

    /// Push an endpoint assignment into an EDS cluster.
    pub fn update_cluster_endpoints(&self, name: &str, assignment: &ClusterLoadAssignment) -> Result<(), ClusterError> {
        let cluster = self.inner.primary.lock().get(name).map(|e| e.cluster.clone());
        match cluster {
            None => Err(ClusterError::UnknownCluster(name.into())),
            Some(ClusterType::Eds(eds)) => {
                eds.apply_assignment(assignment);
                Ok(())
            },
            Some(_) => Err(ClusterError::EndpointsNotSupported(name.into())),
        }
    }

    /// Record an observed health transition (the checking algorithm lives
    /// outside; we repartition and log).
    pub fn update_endpoint_health(&self, name: &str, address: SocketAddr, healthy: bool) {
        let cluster = self.inner.primary.lock().get(name).map(|e| e.cluster.clone());
        if let Some(cluster) = cluster {
            if cluster.update_health(address, healthy) {
                if let Some(log) = &self.inner.outlier_log {
                    log.log_health_transition(name, address, healthy);
                }
            }
        }
    }

    /// Must be called before [`complete_static_load`].
    ///
    /// [`complete_static_load`]: ClusterManager::complete_static_load
    pub fn set_cds(&self, cds: Arc<dyn CdsDriver>) {
        self.inner.init_helper.set_cds(cds);
    }

    /// All construction-time registration is done; start the warm-up gate.
    pub fn complete_static_load(&self) {
        self.inner.init_helper.on_static_load_complete();
    }

    /// Fires exactly once when every registered cluster (plus CDS, if any)
    /// has initialized; synchronously if that already happened.
    pub fn set_initialized_cb(&self, cb: Box<dyn FnOnce() + Send>) {
        self.inner.init_helper.set_initialized_cb(cb);
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.init_helper.is_initialized()
    }

    /// Main-thread lookup against the published snapshot.
    pub fn get(&self, name: &str) -> Option<ClusterType> {
        self.inner.watch.get_clone().0.get(name).cloned()
    }

    /// Names currently managed through the api (the CDS diff base).
    pub fn api_managed_cluster_names(&self) -> Vec<CompactString> {
        self.inner
            .primary
            .lock()
            .iter()
            .filter(|(_, e)| e.added_via_api)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Current descriptors, admin config-dump style.
    pub fn clusters_config_dump(&self) -> Vec<ClusterConfig> {
        self.inner.primary.lock().values().map(|e| e.cluster.info().config.clone()).collect()
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// A fresh per-worker cache. Each worker thread calls this once and owns
    /// the result.
    pub fn thread_local(&self) -> ThreadLocalClusterManager {
        ThreadLocalClusterManager {
            watcher: RefCell::new(self.inner.watch.watcher()),
            pools: RefCell::new(HashMap::new()),
            draining: RefCell::new(Vec::new()),
            async_clients: RefCell::new(HashMap::new()),
        }
    }

    /// Stop discovery tasks. Worker pools drain as their registries observe
    /// the empty snapshot.
    pub fn shutdown(&self) {
        let clusters: Vec<ClusterType> = self.inner.primary.lock().values().map(|e| e.cluster.clone()).collect();
        for cluster in clusters {
            cluster.shutdown();
        }
    }

    fn update_total_clusters(&self) {
        self.inner.stats.total_clusters.set(self.inner.primary.lock().len() as u64);
    }

    fn local_guard_for(
        &self,
        primary: &BTreeMap<CompactString, PrimaryEntry>,
        name: &str,
        stats: &ClusterStats,
    ) -> Option<MemberUpdateCbHandle> {
        let local_name = self.inner.local_cluster_name.as_ref()?;
        if name == local_name.as_str() {
            return None;
        }
        let local = primary.get(local_name).map(|e| e.cluster.clone())?;
        Some(local_membership_guard(&local, stats))
    }
}

fn local_membership_guard(local: &ClusterType, stats: &ClusterStats) -> MemberUpdateCbHandle {
    let counter = stats.lb_local_cluster_update.clone();
    local.add_member_update_cb(Arc::new(move |_, _| counter.inc()))
}

type PoolKey = (usize, ResourcePriority);

struct PoolEntry {
    pool: HttpConnPool,
    /// Keeps the owning cluster alive for as long as the pool exists, in
    /// particular across removal while the pool drains.
    cluster: ClusterType,
}

/// Worker-side view: a private snapshot of the cluster map plus the pool
/// registry keyed `(host identity, priority)`. Not `Send` on purpose; every
/// worker owns exactly one.
pub struct ThreadLocalClusterManager {
    watcher: RefCell<CachedWatcher<ClustersMap>>,
    pools: RefCell<HashMap<PoolKey, PoolEntry>>,
    draining: RefCell<Vec<PoolEntry>>,
    async_clients: RefCell<HashMap<CompactString, AsyncClient>>,
}

impl ThreadLocalClusterManager {
    pub fn get(&self, name: &str) -> Option<ClusterType> {
        self.reconcile();
        self.watcher.borrow_mut().cached_or_latest().get(name).cloned()
    }

    /// Pool for a balanced host, created lazily. `Ok(None)` plus a counter
    /// bump when the balancer finds no healthy host.
    pub fn http_conn_pool_for_cluster(
        &self,
        name: &str,
        priority: ResourcePriority,
        ctx: &LoadBalancerContext,
    ) -> Result<Option<HttpConnPool>, ClusterError> {
        self.reconcile();
        let cluster = self.lookup(name)?;
        let Some(host) = cluster.choose_host(ctx) else {
            cluster.stats().upstream_cx_none_healthy.inc();
            return Ok(None);
        };
        let key = (Arc::as_ptr(&host) as usize, priority);
        let mut pools = self.pools.borrow_mut();
        let entry = pools.entry(key).or_insert_with(|| {
            debug!("new connection pool for {} {:?} {:?}", name, host.address, priority);
            let connector = cluster.info().connector_for(host.address);
            PoolEntry { pool: HttpConnPool::new(Arc::clone(&host), priority, connector), cluster: cluster.clone() }
        });
        Ok(Some(entry.pool.clone()))
    }

    /// Connector plus host for a balanced TCP connection. `Ok(None)` when no
    /// healthy host.
    pub fn tcp_conn_for_cluster(&self, name: &str) -> Result<Option<(TcpConnector, HostRef)>, ClusterError> {
        self.reconcile();
        let cluster = self.lookup(name)?;
        let Some(host) = cluster.choose_host(&LoadBalancerContext::none()) else {
            cluster.stats().upstream_cx_none_healthy.inc();
            return Ok(None);
        };
        Ok(Some((cluster.info().connector_for(host.address), host)))
    }

    /// Long-lived async client for the cluster; recreated transparently when
    /// the cluster is replaced.
    pub fn http_async_client_for_cluster(&self, name: &str) -> Result<AsyncClient, ClusterError> {
        self.reconcile();
        let cluster = self.lookup(name)?;
        let mut clients = self.async_clients.borrow_mut();
        let client = clients
            .entry(name.into())
            .or_insert_with(|| AsyncClient::new(cluster.clone()));
        if !Arc::ptr_eq(client.cluster().info(), cluster.info()) {
            *client = AsyncClient::new(cluster.clone());
        }
        Ok(client.clone())
    }

    fn lookup(&self, name: &str) -> Result<ClusterType, ClusterError> {
        self.watcher
            .borrow_mut()
            .cached_or_latest()
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::UnknownCluster(name.into()))
    }

    /// Catch up with the published snapshot and drain pools whose host (or
    /// whole cluster) is gone. Runs at the top of every lookup, so drains
    /// happen promptly on the thread that owns the pools.
    fn reconcile(&self) {
        let mut watcher = self.watcher.borrow_mut();
        let map = watcher.cached_or_latest();

        let mut pools = self.pools.borrow_mut();
        let stale: Vec<PoolKey> = pools
            .iter()
            .filter(|(_, entry)| !pool_is_live(map, entry))
            .map(|(key, _)| *key)
            .collect();

        let mut draining = self.draining.borrow_mut();
        for key in stale {
            if let Some(entry) = pools.remove(&key) {
                debug!("draining connection pool for {:?}", entry.pool.host().address);
                entry.pool.start_drain();
                if !entry.pool.is_drained() {
                    draining.push(entry);
                }
            }
        }
        // Deferred delete of pools that finished draining since last time.
        draining.retain(|entry| !entry.pool.is_drained());

        let mut clients = self.async_clients.borrow_mut();
        clients.retain(|name, _| map.contains_key(name.as_str()));
    }
}

fn pool_is_live(map: &ClustersMap, entry: &PoolEntry) -> bool {
    let host = entry.pool.host();
    match map.get(host.cluster.as_str()) {
        // Same cluster object, and the exact host is still a member.
        Some(cluster) if Arc::ptr_eq(cluster.info(), entry.cluster.info()) => {
            cluster.host_set().find(host.address).is_some_and(|h| Arc::ptr_eq(h, host))
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusters::cluster::strict_dns::tests::ScriptedResolver;
    use crate::transport::SystemDnsResolver;
    use meridian_configuration::config::bootstrap::{CdsConfig, OutlierEventLogConfig, SdsConfig};
    use meridian_configuration::config::cluster::{DiscoveryType, HostUrl, LbPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn static_cluster(name: &str, hosts: &[&str]) -> ClusterConfig {
        ClusterConfig {
            name: name.into(),
            discovery: DiscoveryType::Static,
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

    fn dns_cluster(name: &str, hosts: &[&str]) -> ClusterConfig {
        ClusterConfig { discovery: DiscoveryType::StrictDns, ..static_cluster(name, hosts) }
    }

    fn eds_cluster(name: &str) -> ClusterConfig {
        ClusterConfig { discovery: DiscoveryType::Eds, hosts: Vec::new(), ..static_cluster(name, &[]) }
    }

    fn manager_config(clusters: Vec<ClusterConfig>) -> ClusterManagerConfig {
        ClusterManagerConfig {
            clusters,
            cds: None,
            sds: None,
            local_cluster_name: None,
            outlier_detection: None,
        }
    }

    fn build(config: &ClusterManagerConfig) -> Result<(ClusterManager, Registry), ClusterError> {
        let registry = Registry::new();
        let manager =
            ClusterManager::new(config, registry.clone(), Arc::new(SystemDnsResolver::new(Vec::new())), false)?;
        Ok((manager, registry))
    }

    fn build_with_resolver(
        config: &ClusterManagerConfig,
        resolver: Arc<ScriptedResolver>,
    ) -> (ClusterManager, Registry) {
        let registry = Registry::new();
        let manager = ClusterManager::new(config, registry.clone(), resolver, false).unwrap();
        (manager, registry)
    }

    #[test]
    fn static_load_installs_every_cluster() {
        let config = manager_config(vec![
            static_cluster("cluster_1", &["127.0.0.1:11001"]),
            static_cluster("cluster_2", &["127.0.0.1:11002"]),
            static_cluster("new_cluster", &["127.0.0.1:11003"]),
        ]);
        let config = ClusterManagerConfig { local_cluster_name: Some("new_cluster".into()), ..config };

        let (manager, registry) = build(&config).unwrap();
        manager.complete_static_load();

        assert_eq!(registry.counter("cluster_manager.cluster_added").value(), 3);
        assert_eq!(registry.gauge("cluster_manager.total_clusters").value(), 3);
        assert!(manager.get("cluster_1").is_some());
        assert!(manager.get("cluster_2").is_some());
        assert!(manager.get("new_cluster").is_some());
        assert!(manager.get("missing").is_none());
    }

    #[test]
    fn undefined_local_cluster_is_fatal() {
        let config = ClusterManagerConfig {
            local_cluster_name: Some("new_cluster".into()),
            ..manager_config(vec![
                static_cluster("cluster_1", &["127.0.0.1:11001"]),
                static_cluster("cluster_2", &["127.0.0.1:11002"]),
            ])
        };
        let err = build(&config).unwrap_err();
        assert!(matches!(err, ClusterError::Configuration(_)));
    }

    #[test]
    fn duplicate_static_cluster_is_fatal() {
        let config = manager_config(vec![
            static_cluster("cluster_1", &["127.0.0.1:11001"]),
            static_cluster("cluster_1", &["127.0.0.1:11002"]),
        ]);
        let err = build(&config).unwrap_err();
        assert!(matches!(err, ClusterError::DuplicateCluster(name) if name == "cluster_1"));
    }

    #[test]
    fn dynamic_add_update_remove() {
        let (manager, registry) = build(&manager_config(Vec::new())).unwrap();
        manager.complete_static_load();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        manager.set_initialized_cb(Box::new(move || {
            fired2.fetch_add(1, Ordering::Relaxed);
        }));
        // No clusters at all: initialized immediately.
        assert_eq!(fired.load(Ordering::Relaxed), 1);

        assert!(manager.add_or_update_primary_cluster(static_cluster("fake_cluster", &["127.0.0.1:80"])).unwrap());
        assert_eq!(registry.gauge("cluster_manager.total_clusters").value(), 1);
        assert!(manager.get("fake_cluster").is_some());

        // Same hash: no-op.
        assert!(!manager.add_or_update_primary_cluster(static_cluster("fake_cluster", &["127.0.0.1:80"])).unwrap());

        // Changed descriptor: replacement.
        let mut update = static_cluster("fake_cluster", &["127.0.0.1:80"]);
        update.per_connection_buffer_limit_bytes = Some(12345);
        assert!(manager.add_or_update_primary_cluster(update).unwrap());
        assert_eq!(registry.counter("cluster_manager.cluster_modified").value(), 1);

        let workers = manager.thread_local();
        let pool = workers
            .http_conn_pool_for_cluster("fake_cluster", ResourcePriority::Default, &LoadBalancerContext::none())
            .unwrap()
            .unwrap();
        let drained = Arc::new(AtomicUsize::new(0));
        let drained2 = Arc::clone(&drained);
        pool.add_drained_callback(Box::new(move || {
            drained2.fetch_add(1, Ordering::Relaxed);
        }));

        assert!(manager.remove_primary_cluster("fake_cluster"));
        assert!(manager.get("fake_cluster").is_none());
        // The worker notices on its next touch and drains the idle pool.
        assert!(workers.get("fake_cluster").is_none());
        assert_eq!(drained.load(Ordering::Relaxed), 1);

        assert!(!manager.remove_primary_cluster("foo"));

        assert_eq!(registry.counter("cluster_manager.cluster_added").value(), 1);
        assert_eq!(registry.counter("cluster_manager.cluster_modified").value(), 1);
        assert_eq!(registry.counter("cluster_manager.cluster_removed").value(), 1);
        assert_eq!(registry.gauge("cluster_manager.total_clusters").value(), 0);
    }

    #[test]
    fn registry_and_gauge_track_every_add_remove_sequence() {
        let (manager, registry) = build(&manager_config(Vec::new())).unwrap();
        manager.complete_static_load();

        enum Step {
            Add(&'static str),
            Remove(&'static str),
        }
        use Step::*;
        let script = [
            Add("a"),
            Add("b"),
            Remove("a"),
            Add("c"),
            Add("a"),
            Remove("missing"),
            Remove("b"),
            Remove("c"),
            Remove("a"),
            Add("d"),
        ];

        let mut expected: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
        for step in script {
            match step {
                Add(name) => {
                    manager.add_or_update_primary_cluster(static_cluster(name, &["127.0.0.1:80"])).unwrap();
                    expected.insert(name);
                },
                Remove(name) => {
                    assert_eq!(manager.remove_primary_cluster(name), expected.remove(name));
                },
            }
            for name in ["a", "b", "c", "d", "missing"] {
                assert_eq!(manager.get(name).is_some(), expected.contains(name), "after step, cluster {name}");
            }
            assert_eq!(registry.gauge("cluster_manager.total_clusters").value(), expected.len() as u64);
        }
    }

    #[test]
    fn static_clusters_resist_the_dynamic_api() {
        let (manager, _registry) =
            build(&manager_config(vec![static_cluster("some_cluster", &["127.0.0.1:80"])])).unwrap();
        manager.complete_static_load();

        let mut update = static_cluster("some_cluster", &["127.0.0.2:80"]);
        update.per_connection_buffer_limit_bytes = Some(1);
        assert!(!manager.add_or_update_primary_cluster(update).unwrap());
        assert!(!manager.remove_primary_cluster("some_cluster"));
        assert!(manager.get("some_cluster").is_some());
    }

    #[test]
    fn unknown_cluster_lookups() {
        let (manager, _registry) =
            build(&manager_config(vec![static_cluster("cluster_1", &["127.0.0.1:80"])])).unwrap();
        manager.complete_static_load();
        let workers = manager.thread_local();

        assert!(workers.get("hello").is_none());
        assert!(matches!(
            workers.http_conn_pool_for_cluster("hello", ResourcePriority::Default, &LoadBalancerContext::none()),
            Err(ClusterError::UnknownCluster(_))
        ));
        assert!(matches!(workers.tcp_conn_for_cluster("hello"), Err(ClusterError::UnknownCluster(_))));
        assert!(matches!(workers.http_async_client_for_cluster("hello"), Err(ClusterError::UnknownCluster(_))));
    }

    #[test]
    fn buffer_limits_reach_the_connectors() {
        let mut cluster = static_cluster("cluster_1", &["127.0.0.1:11001"]);
        cluster.per_connection_buffer_limit_bytes = Some(8192);
        let (manager, _registry) = build(&manager_config(vec![cluster])).unwrap();
        manager.complete_static_load();

        let workers = manager.thread_local();
        let (connector, host) = workers.tcp_conn_for_cluster("cluster_1").unwrap().unwrap();
        assert_eq!(connector.buffer_limit(), Some(8192));
        assert_eq!(host.address, "127.0.0.1:11001".parse().unwrap());
    }

    #[tokio::test]
    async fn dns_host_removal_drains_only_that_hosts_pools() {
        let resolver = Arc::new(ScriptedResolver::default());
        resolver.answer("localhost", &["127.0.0.1", "127.0.0.2"]);
        let (manager, registry) =
            build_with_resolver(&manager_config(vec![dns_cluster("cluster_1", &["localhost:11001"])]), resolver.clone());
        manager.complete_static_load();
        let workers = manager.thread_local();

        // Before any resolution there are no hosts at all.
        assert!(workers
            .http_conn_pool_for_cluster("cluster_1", ResourcePriority::Default, &LoadBalancerContext::none())
            .unwrap()
            .is_none());
        assert!(workers.tcp_conn_for_cluster("cluster_1").unwrap().is_none());
        assert_eq!(registry.counter("cluster.cluster_1.upstream_cx_none_healthy").value(), 2);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        manager.set_initialized_cb(Box::new(move || {
            fired2.fetch_add(1, Ordering::Relaxed);
        }));

        let ClusterType::StrictDns(dns) = manager.get("cluster_1").unwrap() else {
            panic!("expected strict dns cluster");
        };
        dns.resolve_once().await;
        assert_eq!(fired.load(Ordering::Relaxed), 1);

        // Post-initialization registration is synchronous.
        let again = Arc::new(AtomicUsize::new(0));
        let again2 = Arc::clone(&again);
        manager.set_initialized_cb(Box::new(move || {
            again2.fetch_add(1, Ordering::Relaxed);
        }));
        assert_eq!(again.load(Ordering::Relaxed), 1);

        let pool_for = |priority| {
            workers
                .http_conn_pool_for_cluster("cluster_1", priority, &LoadBalancerContext::none())
                .unwrap()
                .unwrap()
        };
        let cp1 = pool_for(ResourcePriority::Default);
        let cp2 = pool_for(ResourcePriority::Default);
        let cp1_high = pool_for(ResourcePriority::High);
        let cp2_high = pool_for(ResourcePriority::High);
        assert_ne!(cp1, cp2);
        assert_ne!(cp1_high, cp2_high);
        assert_ne!(cp1, cp1_high);

        let drains = Arc::new(AtomicUsize::new(0));
        for pool in [&cp1, &cp1_high] {
            let drains2 = Arc::clone(&drains);
            pool.add_drained_callback(Box::new(move || {
                drains2.fetch_add(1, Ordering::Relaxed);
            }));
        }
        // These two must never drain.
        for pool in [&cp2, &cp2_high] {
            pool.add_drained_callback(Box::new(|| panic!("surviving host's pool drained")));
        }

        // First host disappears from DNS.
        resolver.answer("localhost", &["127.0.0.2"]);
        dns.resolve_once().await;

        let cp3 = pool_for(ResourcePriority::Default);
        let cp3_high = pool_for(ResourcePriority::High);
        assert_eq!(drains.load(Ordering::Relaxed), 2);
        assert_eq!(cp2, cp3);
        assert_eq!(cp2_high, cp3_high);

        // A host that comes and goes without ever being asked for a pool
        // causes no drain activity.
        resolver.answer("localhost", &["127.0.0.2", "127.0.0.3"]);
        dns.resolve_once().await;
        resolver.answer("localhost", &["127.0.0.2"]);
        dns.resolve_once().await;
        let cp4 = pool_for(ResourcePriority::Default);
        assert_eq!(cp2, cp4);
        assert_eq!(drains.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn callbacks_on_the_local_cluster_die_with_their_owner() {
        let resolver = Arc::new(ScriptedResolver::default());
        resolver.answer("localhost", &["127.0.0.1"]);
        let config = ClusterManagerConfig {
            local_cluster_name: Some("local_cluster".into()),
            ..manager_config(vec![dns_cluster("local_cluster", &["localhost:11001"])])
        };
        let (manager, _registry) = build_with_resolver(&config, resolver.clone());
        manager.complete_static_load();

        let ClusterType::StrictDns(local) = manager.get("local_cluster").unwrap() else {
            panic!("expected strict dns cluster");
        };
        local.resolve_once().await;

        assert!(manager.add_or_update_primary_cluster(static_cluster("cluster1", &["127.0.0.1:80"])).unwrap());
        let cluster1 = manager.get("cluster1").unwrap();
        assert_eq!(cluster1.stats().lb_local_cluster_update.value(), 0);

        // Local membership changes while cluster1 is alive: observed.
        resolver.answer("localhost", &["127.0.0.1", "127.0.0.2"]);
        local.resolve_once().await;
        assert_eq!(cluster1.stats().lb_local_cluster_update.value(), 1);

        // Callbacks registered by third parties keep working after the
        // removal below.
        let third_party = Arc::new(AtomicUsize::new(0));
        let third_party2 = Arc::clone(&third_party);
        let _handle = local.add_member_update_cb(Arc::new(move |_, _| {
            third_party2.fetch_add(1, Ordering::Relaxed);
        }));

        assert!(manager.remove_primary_cluster("cluster1"));

        resolver.answer("localhost", &["127.0.0.1"]);
        local.resolve_once().await;
        assert_eq!(third_party.load(Ordering::Relaxed), 1);
        // The removed cluster's registration fired nothing further.
        assert_eq!(cluster1.stats().lb_local_cluster_update.value(), 1);
    }

    #[test]
    fn eds_cluster_warms_up_through_endpoint_pushes() {
        let config = ClusterManagerConfig {
            sds: Some(SdsConfig { cluster: static_cluster("sds_backing", &["127.0.0.1:9100"]), refresh_delay_ms: 1000 }),
            ..manager_config(vec![eds_cluster("cluster_1")])
        };
        let (manager, _registry) = build(&config).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        manager.set_initialized_cb(Box::new(move || {
            fired2.fetch_add(1, Ordering::Relaxed);
        }));
        manager.complete_static_load();
        // The EDS cluster is still warming.
        assert_eq!(fired.load(Ordering::Relaxed), 0);

        manager.update_cluster_endpoints("cluster_1", &ClusterLoadAssignment::default()).unwrap();
        assert_eq!(fired.load(Ordering::Relaxed), 1);

        // Endpoint pushes into non-EDS clusters are rejected.
        assert!(matches!(
            manager.update_cluster_endpoints("sds_backing", &ClusterLoadAssignment::default()),
            Err(ClusterError::EndpointsNotSupported(_))
        ));
        assert!(matches!(
            manager.update_cluster_endpoints("nope", &ClusterLoadAssignment::default()),
            Err(ClusterError::UnknownCluster(_))
        ));
    }

    #[test]
    fn cds_gate_holds_the_initialized_signal() {
        struct GateCds {
            initialize_calls: AtomicUsize,
            cb: Mutex<Option<Box<dyn FnOnce() + Send>>>,
        }
        impl CdsDriver for GateCds {
            fn initialize(&self) {
                self.initialize_calls.fetch_add(1, Ordering::Relaxed);
            }
            fn set_initialized_cb(&self, cb: Box<dyn FnOnce() + Send>) {
                *self.cb.lock() = Some(cb);
            }
        }

        let config = ClusterManagerConfig {
            cds: Some(CdsConfig {
                cluster: Some(static_cluster("cds_cluster", &["127.0.0.1:9200"])),
                path: None,
                refresh_delay_ms: 1000,
            }),
            ..manager_config(vec![static_cluster("cluster_0", &["127.0.0.1:9000"])])
        };
        let (manager, _registry) = build(&config).unwrap();
        let cds = Arc::new(GateCds { initialize_calls: AtomicUsize::new(0), cb: Mutex::new(None) });
        manager.set_cds(cds.clone());

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        manager.set_initialized_cb(Box::new(move || {
            fired2.fetch_add(1, Ordering::Relaxed);
        }));

        manager.complete_static_load();
        // Statics are done (instantaneous), so the CDS fetch has started and
        // the user signal is gated on it.
        assert_eq!(cds.initialize_calls.load(Ordering::Relaxed), 1);
        assert_eq!(fired.load(Ordering::Relaxed), 0);

        // First CDS update adds a cluster, then reports done.
        assert!(manager.add_or_update_primary_cluster(static_cluster("cluster_4", &["127.0.0.1:9400"])).unwrap());
        let cb = cds.cb.lock().take().unwrap();
        cb();
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert!(manager.is_initialized());
    }

    #[test]
    fn outlier_log_records_health_transitions() {
        let dir = std::env::temp_dir().join(format!("manager-outlier-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("events.log");
        let config = ClusterManagerConfig {
            outlier_detection: Some(OutlierEventLogConfig { event_log_path: path.clone() }),
            ..manager_config(vec![static_cluster("cluster_1", &["127.0.0.1:80"])])
        };
        let (manager, _registry) = build(&config).unwrap();
        manager.complete_static_load();

        let address: SocketAddr = "127.0.0.1:80".parse().unwrap();
        manager.update_endpoint_health("cluster_1", address, false);
        // Repeating the same state is not a transition.
        manager.update_endpoint_health("cluster_1", address, false);
        manager.update_endpoint_health("cluster_1", address, true);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }
}
