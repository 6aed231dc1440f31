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

use crate::{
    clusters::{
        balancers::LoadBalancerContext,
        cluster::{ClusterOps, ClusterType},
        host::HostRef,
    },
    transport::{ConnectError, TcpConnector, UpstreamConnection},
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourcePriority {
    Default,
    High,
}

pub type DrainedCb = Box<dyn FnOnce() + Send>;

struct DrainState {
    draining: bool,
    drained_fired: bool,
    drained_cbs: Vec<DrainedCb>,
}

struct PoolShared {
    host: HostRef,
    priority: ResourcePriority,
    connector: TcpConnector,
    active: AtomicU64,
    state: Mutex<DrainState>,
}

/// Connection pool for one `(host, priority)` pair, owned by a single worker
/// thread's registry. Cloning shares the pool; clones compare equal.
///
/// Drain protocol: after [`HttpConnPool::start_drain`] the pool hands out no
/// new streams, in-flight streams run to completion, and the registered
/// drained callbacks fire exactly once when the last stream returns. The
/// host reference is held until then, which is what keeps a removed
/// cluster's endpoints alive while traffic quiesces.
#[derive(Clone)]
pub struct HttpConnPool {
    shared: Arc<PoolShared>,
}

impl PartialEq for HttpConnPool {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for HttpConnPool {}

impl HttpConnPool {
    pub fn new(host: HostRef, priority: ResourcePriority, connector: TcpConnector) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                host,
                priority,
                connector,
                active: AtomicU64::new(0),
                state: Mutex::new(DrainState { draining: false, drained_fired: false, drained_cbs: Vec::new() }),
            }),
        }
    }

    pub fn host(&self) -> &HostRef {
        &self.shared.host
    }

    pub fn priority(&self) -> ResourcePriority {
        self.shared.priority
    }

    pub fn active_streams(&self) -> u64 {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn is_draining(&self) -> bool {
        self.shared.state.lock().draining
    }

    pub fn is_drained(&self) -> bool {
        let state = self.shared.state.lock();
        state.draining && self.shared.active.load(Ordering::Acquire) == 0
    }

    /// Reserve a stream slot. `None` once draining.
    pub fn checkout(&self) -> Option<StreamSlot> {
        {
            let state = self.shared.state.lock();
            if state.draining {
                return None;
            }
            self.shared.active.fetch_add(1, Ordering::AcqRel);
        }
        self.shared.host.request_started();
        Some(StreamSlot { shared: Arc::clone(&self.shared) })
    }

    /// Reserve a slot and dial the host.
    pub async fn new_stream(&self) -> Result<Option<PooledStream>, ConnectError> {
        let Some(slot) = self.checkout() else {
            return Ok(None);
        };
        let connection = self.shared.connector.connect().await?;
        Ok(Some(PooledStream { connection, _slot: slot }))
    }

    /// Register interest in drain completion. Fires immediately when the
    /// pool has already drained.
    pub fn add_drained_callback(&self, cb: DrainedCb) {
        let fire_now = {
            let mut state = self.shared.state.lock();
            if state.drained_fired {
                true
            } else {
                state.drained_cbs.push(cb);
                return;
            }
        };
        if fire_now {
            cb();
        }
    }

    /// Stop accepting new streams; complete in-flight ones. Idempotent.
    pub fn start_drain(&self) {
        let callbacks = {
            let mut state = self.shared.state.lock();
            state.draining = true;
            Self::take_callbacks_if_idle(&self.shared, &mut state)
        };
        run_drained(callbacks);
    }

    fn take_callbacks_if_idle(shared: &PoolShared, state: &mut DrainState) -> Vec<DrainedCb> {
        if state.draining && !state.drained_fired && shared.active.load(Ordering::Acquire) == 0 {
            state.drained_fired = true;
            std::mem::take(&mut state.drained_cbs)
        } else {
            Vec::new()
        }
    }
}

impl std::fmt::Debug for HttpConnPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnPool")
            .field("host", &self.shared.host.address)
            .field("priority", &self.shared.priority)
            .field("active", &self.active_streams())
            .finish()
    }
}

fn run_drained(callbacks: Vec<DrainedCb>) {
    for cb in callbacks {
        cb();
    }
}

/// Accounting guard for one upstream stream. Dropping it returns the slot
/// and completes a pending drain when it was the last one out.
pub struct StreamSlot {
    shared: Arc<PoolShared>,
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        self.shared.host.request_finished();
        self.shared.active.fetch_sub(1, Ordering::AcqRel);
        let callbacks = {
            let mut state = self.shared.state.lock();
            HttpConnPool::take_callbacks_if_idle(&self.shared, &mut state)
        };
        run_drained(callbacks);
    }
}

/// A dialed connection plus its pool accounting guard.
pub struct PooledStream {
    pub connection: UpstreamConnection,
    _slot: StreamSlot,
}

/// Long-lived per-cluster client handle. Each call balances across the
/// cluster's current membership; holding the cluster clone keeps the cluster
/// alive for as long as the client exists.
#[derive(Debug, Clone)]
pub struct AsyncClient {
    cluster: ClusterType,
}

impl AsyncClient {
    pub(crate) fn new(cluster: ClusterType) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &ClusterType {
        &self.cluster
    }

    /// Dial a balanced host. `None` when no healthy host is available.
    pub async fn connect(&self, ctx: &LoadBalancerContext) -> Result<Option<UpstreamConnection>, ConnectError> {
        let Some(host) = self.cluster.choose_host(ctx) else {
            self.cluster.stats().upstream_cx_none_healthy.inc();
            return Ok(None);
        };
        let connection = self.cluster.info().connector_for(host.address).connect().await?;
        Ok(Some(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusters::host::Host;
    use std::{sync::atomic::AtomicUsize, time::Duration};

    fn pool() -> HttpConnPool {
        let host = Host::new("cluster_1", "", "127.0.0.1:8080".parse().unwrap());
        let connector = TcpConnector::new(host.address, Duration::from_millis(250), None);
        HttpConnPool::new(host, ResourcePriority::Default, connector)
    }

    fn counting_cb(counter: &Arc<AtomicUsize>) -> DrainedCb {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
    }

    #[test]
    fn idle_pool_drains_immediately() {
        let pool = pool();
        let fired = Arc::new(AtomicUsize::new(0));
        pool.add_drained_callback(counting_cb(&fired));
        pool.start_drain();
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        // A second drain does not re-fire.
        pool.start_drain();
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn busy_pool_drains_when_last_stream_returns() {
        let pool = pool();
        let fired = Arc::new(AtomicUsize::new(0));
        pool.add_drained_callback(counting_cb(&fired));

        let slot_a = pool.checkout().unwrap();
        let slot_b = pool.checkout().unwrap();
        pool.start_drain();
        assert_eq!(fired.load(Ordering::Relaxed), 0);
        assert!(pool.checkout().is_none());

        drop(slot_a);
        assert_eq!(fired.load(Ordering::Relaxed), 0);
        drop(slot_b);
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert!(pool.is_drained());
    }

    #[test]
    fn callback_registered_after_drain_fires_at_once() {
        let pool = pool();
        pool.start_drain();
        let fired = Arc::new(AtomicUsize::new(0));
        pool.add_drained_callback(counting_cb(&fired));
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn stream_slots_track_host_load() {
        let pool = pool();
        assert_eq!(pool.host().active_requests(), 0);
        let slot = pool.checkout().unwrap();
        assert_eq!(pool.host().active_requests(), 1);
        drop(slot);
        assert_eq!(pool.host().active_requests(), 0);
    }
}
