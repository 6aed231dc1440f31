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

use compact_str::CompactString;
use parking_lot::{Mutex, RwLock};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
};

/// A single upstream endpoint. Immutable once constructed; shared by
/// reference count between host sets, balancers, pools, and in-flight
/// callbacks, so a membership change never invalidates anyone's handle.
#[derive(Debug)]
pub struct Host {
    pub cluster: CompactString,
    pub hostname: CompactString,
    pub address: SocketAddr,
    pub canary: bool,
    pub weight: u32,
    pub zone: CompactString,
    active_requests: AtomicU64,
}

pub type HostRef = Arc<Host>;

impl Host {
    pub fn new(cluster: impl Into<CompactString>, hostname: impl Into<CompactString>, address: SocketAddr) -> HostRef {
        Arc::new(Host {
            cluster: cluster.into(),
            hostname: hostname.into(),
            address,
            canary: false,
            weight: 1,
            zone: CompactString::default(),
            active_requests: AtomicU64::new(0),
        })
    }

    pub fn with_metadata(
        cluster: impl Into<CompactString>,
        hostname: impl Into<CompactString>,
        address: SocketAddr,
        canary: bool,
        weight: u32,
        zone: impl Into<CompactString>,
    ) -> HostRef {
        Arc::new(Host {
            cluster: cluster.into(),
            hostname: hostname.into(),
            address,
            canary,
            weight: weight.max(1),
            zone: zone.into(),
            active_requests: AtomicU64::new(0),
        })
    }

    pub fn active_requests(&self) -> u64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn request_started(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn request_finished(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

/// One published view of a cluster's membership: every host plus the healthy
/// subset. Snapshots are immutable; an update builds a fresh one.
#[derive(Debug, Default)]
pub struct HostSet {
    pub hosts: Vec<HostRef>,
    pub healthy: Vec<HostRef>,
}

impl HostSet {
    pub fn new(hosts: Vec<HostRef>, healthy: Vec<HostRef>) -> Self {
        debug_assert!(healthy.iter().all(|h| hosts.iter().any(|o| Arc::ptr_eq(h, o))));
        Self { hosts, healthy }
    }

    pub fn contains_address(&self, address: SocketAddr) -> bool {
        self.hosts.iter().any(|h| h.address == address)
    }

    pub fn find(&self, address: SocketAddr) -> Option<&HostRef> {
        self.hosts.iter().find(|h| h.address == address)
    }
}

/// Pointer-swap publication of [`HostSet`] snapshots. Readers clone an `Arc`
/// and never block a writer; the version counter lets pool registries detect
/// that membership moved underneath them.
#[derive(Debug)]
pub struct HostSetWatch {
    current: RwLock<Arc<HostSet>>,
    version: AtomicUsize,
}

impl HostSetWatch {
    pub fn new() -> Self {
        Self { current: RwLock::new(Arc::new(HostSet::default())), version: AtomicUsize::new(0) }
    }

    pub fn snapshot(&self) -> Arc<HostSet> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> usize {
        self.version.load(Ordering::Acquire)
    }

    pub fn publish(&self, set: HostSet) {
        *self.current.write() = Arc::new(set);
        self.version.fetch_add(1, Ordering::Release);
    }
}

impl Default for HostSetWatch {
    fn default() -> Self {
        Self::new()
    }
}

pub type MemberUpdateCb = Arc<dyn Fn(&[HostRef], &[HostRef]) + Send + Sync>;

struct CbEntry {
    id: u64,
    cb: MemberUpdateCb,
}

/// Membership-change callback list. Invocation clones the entries out of the
/// lock first, so a callback is free to register or drop further callbacks.
/// Entries added during a run are not invoked for that run.
#[derive(Default)]
pub struct MemberUpdateCbs {
    entries: Mutex<Vec<CbEntry>>,
    next_id: AtomicU64,
}

impl MemberUpdateCbs {
    pub fn add(self: &Arc<Self>, cb: MemberUpdateCb) -> MemberUpdateCbHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(CbEntry { id, cb });
        MemberUpdateCbHandle { id, list: Arc::downgrade(self) }
    }

    pub fn run(&self, added: &[HostRef], removed: &[HostRef]) {
        let callbacks: Vec<MemberUpdateCb> = self.entries.lock().iter().map(|e| Arc::clone(&e.cb)).collect();
        for cb in callbacks {
            cb(added, removed);
        }
    }

    fn remove(&self, id: u64) {
        self.entries.lock().retain(|e| e.id != id);
    }
}

impl std::fmt::Debug for MemberUpdateCbs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberUpdateCbs").field("len", &self.entries.lock().len()).finish()
    }
}

/// Deregisters its callback on drop. Whoever registered the callback holds
/// the handle; dropping the registrant therefore silences the callback even
/// if the observed cluster outlives it.
#[derive(Debug)]
pub struct MemberUpdateCbHandle {
    id: u64,
    list: Weak<MemberUpdateCbs>,
}

impl Drop for MemberUpdateCbHandle {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            list.remove(self.id);
        }
    }
}
