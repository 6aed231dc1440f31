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

use parking_lot::RwLock;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Write-side of a versioned snapshot. The owner mutates through
/// [`CachedWatch::update`]; readers hold a [`CachedWatcher`] that keeps a
/// private clone and only re-reads when the version counter moved.
#[derive(Debug)]
pub struct CachedWatch<T: Clone> {
    shared: Arc<Shared<T>>,
}

#[derive(Debug)]
struct Shared<T> {
    value: RwLock<T>,
    version: AtomicUsize,
}

impl<T: Clone> Clone for CachedWatch<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T: Clone> CachedWatch<T> {
    pub fn new(value: T) -> Self {
        Self { shared: Arc::new(Shared { value: RwLock::new(value), version: AtomicUsize::new(0) }) }
    }

    pub fn version(&self) -> usize {
        self.shared.version.load(Ordering::Acquire)
    }

    pub fn update<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> R {
        let mut w_lock = self.shared.value.write();
        let ret = f(&mut w_lock);
        self.shared.version.fetch_add(1, Ordering::Release);
        ret
    }

    pub fn get_clone(&self) -> (T, usize) {
        let r_lock = self.shared.value.read();
        let value = r_lock.clone();
        let version = self.version();
        (value, version)
    }

    pub fn watcher(&self) -> CachedWatcher<T> {
        let (local, version) = self.get_clone();
        CachedWatcher { shared: Arc::clone(&self.shared), version, local }
    }
}

/// Read-side cache. Not `Sync`; each worker thread owns its own.
#[derive(Debug)]
pub struct CachedWatcher<T: Clone> {
    shared: Arc<Shared<T>>,
    version: usize,
    local: T,
}

impl<T: Clone> CachedWatcher<T> {
    /// Version of the locally-held clone.
    pub fn version(&self) -> usize {
        self.version
    }

    pub fn cached_or_latest(&mut self) -> &mut T {
        let shared_version = self.shared.version.load(Ordering::Acquire);
        if shared_version != self.version {
            // A failed try_read means a writer holds the lock right now; we
            // keep serving the previous snapshot and catch up on the next
            // call. Updates are rare relative to reads, so a reader is never
            // starved in practice.
            if let Some(r_lock) = self.shared.value.try_read() {
                self.local = r_lock.clone();
                self.version = self.shared.version.load(Ordering::Acquire);
            }
        }
        &mut self.local
    }
}
