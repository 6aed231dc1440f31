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

use crate::subscription::{Subscription, SubscriptionCallbacks};
use meridian_configuration::config::cluster::Cluster as ClusterConfig;
use meridian_lib::{CdsDriver, ClusterManager};
use parking_lot::Mutex;
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{info, warn};

/// Cluster discovery driver: turns full-state resource pushes into
/// add/update/remove calls against the api-managed subset of the manager.
/// After the first update lands (even a failed one) the driver reports
/// itself initialized exactly once, releasing the manager's CDS gate;
/// startup proceeds with whatever configuration was applicable.
pub struct CdsApi {
    inner: Arc<CdsInner>,
}

struct CdsInner {
    manager: ClusterManager,
    subscription: Mutex<Option<Box<dyn Subscription<ClusterConfig> + Send>>>,
    init_cb: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    init_fired: AtomicBool,
}

impl CdsApi {
    pub fn new(manager: ClusterManager, subscription: Box<dyn Subscription<ClusterConfig> + Send>) -> Self {
        Self {
            inner: Arc::new(CdsInner {
                manager,
                subscription: Mutex::new(Some(subscription)),
                init_cb: Mutex::new(None),
                init_fired: AtomicBool::new(false),
            }),
        }
    }
}

impl CdsDriver for CdsApi {
    fn initialize(&self) {
        let Some(mut subscription) = self.inner.subscription.lock().take() else {
            warn!("cds initialized twice");
            return;
        };
        let callbacks = CdsCallbacks { inner: Arc::clone(&self.inner) };
        subscription.start(Vec::new(), Box::new(callbacks));
        // Keep the subscription alive for the lifetime of the driver.
        *self.inner.subscription.lock() = Some(subscription);
    }

    fn set_initialized_cb(&self, cb: Box<dyn FnOnce() + Send>) {
        *self.inner.init_cb.lock() = Some(cb);
    }
}

struct CdsCallbacks {
    inner: Arc<CdsInner>,
}

impl CdsCallbacks {
    fn run_initialize_cb(&self) {
        if self.inner.init_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let cb = self.inner.init_cb.lock().take();
        if let Some(cb) = cb {
            cb();
        }
    }
}

impl SubscriptionCallbacks<ClusterConfig> for CdsCallbacks {
    fn on_config_update(&mut self, resources: Vec<ClusterConfig>) -> Result<(), crate::Error> {
        let manager = &self.inner.manager;
        let mut seen: BTreeSet<_> = BTreeSet::new();
        let mut rejected: Vec<String> = Vec::new();

        for cluster in resources {
            let name = cluster.name.clone();
            seen.insert(name.clone());
            match manager.add_or_update_primary_cluster(cluster) {
                Ok(true) => info!("cds: add/update cluster \"{name}\""),
                Ok(false) => {},
                // One bad cluster must not poison the rest of the batch.
                Err(err) => {
                    warn!("cds: rejected cluster \"{name}\": {err}");
                    rejected.push(format!("{name}: {err}"));
                },
            }
        }

        // Everything api-managed that the update no longer names goes away.
        for name in manager.api_managed_cluster_names() {
            if !seen.contains(&name) && manager.remove_primary_cluster(&name) {
                info!("cds: remove cluster \"{name}\"");
            }
        }

        self.run_initialize_cb();

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(format!("rejected cluster configurations: {}", rejected.join("; ")).into())
        }
    }

    fn on_config_update_failed(&mut self, _error: Option<&crate::Error>) {
        // Startup continues even on a bad or missing config.
        self.run_initialize_cb();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_configuration::config::bootstrap::ClusterManagerConfig;
    use meridian_configuration::config::cluster::{DiscoveryType, HostUrl, LbPolicy};
    use meridian_lib::SystemDnsResolver;
    use meridian_metrics::Registry;
    use std::sync::atomic::AtomicUsize;

    fn cluster(name: &str, host: &str) -> ClusterConfig {
        ClusterConfig {
            name: name.into(),
            discovery: DiscoveryType::Static,
            connect_timeout_ms: 250,
            lb_type: LbPolicy::default(),
            hosts: vec![HostUrl::new(format!("tcp://{host}"))],
            per_connection_buffer_limit_bytes: None,
            dns_resolvers: Vec::new(),
            dns_refresh_rate: None,
            health_check: None,
            outlier_detection: None,
        }
    }

    fn manager_with_static(static_clusters: Vec<ClusterConfig>) -> ClusterManager {
        let config = ClusterManagerConfig {
            clusters: static_clusters,
            cds: None,
            sds: None,
            local_cluster_name: None,
            outlier_detection: None,
        };
        let manager =
            ClusterManager::new(&config, Registry::new(), Arc::new(SystemDnsResolver::new(Vec::new())), false)
                .unwrap();
        manager.complete_static_load();
        manager
    }

    fn callbacks_for(manager: &ClusterManager) -> (CdsCallbacks, Arc<AtomicUsize>) {
        let cds = CdsApi::new(
            manager.clone(),
            Box::new(NullSubscription),
        );
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        cds.set_initialized_cb(Box::new(move || {
            fired2.fetch_add(1, Ordering::Relaxed);
        }));
        (CdsCallbacks { inner: Arc::clone(&cds.inner) }, fired)
    }

    struct NullSubscription;
    impl Subscription<ClusterConfig> for NullSubscription {
        fn start(&mut self, _resources: Vec<String>, _callbacks: Box<dyn SubscriptionCallbacks<ClusterConfig>>) {}
        fn update_resources(&mut self, _resources: Vec<String>) {}
    }

    #[test]
    fn full_state_diff_adds_and_removes() {
        let manager = manager_with_static(vec![cluster("static_one", "127.0.0.1:9000")]);
        let (mut callbacks, fired) = callbacks_for(&manager);

        callbacks
            .on_config_update(vec![cluster("dyn_a", "127.0.0.1:9001"), cluster("dyn_b", "127.0.0.1:9002")])
            .unwrap();
        assert!(manager.get("dyn_a").is_some());
        assert!(manager.get("dyn_b").is_some());
        assert_eq!(fired.load(Ordering::Relaxed), 1);

        // Next push drops dyn_b; the static cluster is untouched throughout.
        callbacks.on_config_update(vec![cluster("dyn_a", "127.0.0.1:9001")]).unwrap();
        assert!(manager.get("dyn_a").is_some());
        assert!(manager.get("dyn_b").is_none());
        assert!(manager.get("static_one").is_some());
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn empty_update_clears_only_api_managed_clusters() {
        let manager = manager_with_static(vec![cluster("static_one", "127.0.0.1:9000")]);
        let (mut callbacks, _fired) = callbacks_for(&manager);

        callbacks.on_config_update(vec![cluster("dyn_a", "127.0.0.1:9001")]).unwrap();
        callbacks.on_config_update(Vec::new()).unwrap();
        assert!(manager.get("dyn_a").is_none());
        assert!(manager.get("static_one").is_some());
    }

    #[test]
    fn one_bad_cluster_does_not_poison_the_batch() {
        let manager = manager_with_static(Vec::new());
        let (mut callbacks, _fired) = callbacks_for(&manager);

        let mut bad = cluster("bad^name", "127.0.0.1:9001");
        bad.name = "bad^name".into();
        let result = callbacks.on_config_update(vec![bad, cluster("good", "127.0.0.1:9002")]);
        assert!(result.is_err());
        assert!(manager.get("good").is_some());
    }

    #[test]
    fn failed_update_still_releases_the_gate_once() {
        let manager = manager_with_static(Vec::new());
        let (mut callbacks, fired) = callbacks_for(&manager);

        callbacks.on_config_update_failed(None);
        callbacks.on_config_update_failed(None);
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }
}
