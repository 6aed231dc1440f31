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

//! Minimal stats store: named counters and gauges grouped under dotted
//! prefix scopes (`cluster_manager.`, `cluster.<name>.`, ...). Cells are
//! plain atomics shared between the recording site and the registry, so
//! recording never takes the registry lock.

use compact_str::{format_compact, CompactString};
use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Gauge(Arc<AtomicU64>);

impl Gauge {
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self.0.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct Cells {
    counters: RwLock<BTreeMap<CompactString, Counter>>,
    gauges: RwLock<BTreeMap<CompactString, Gauge>>,
}

/// One stats store. Each cluster manager owns one; admin surfaces snapshot
/// it through [`Registry::counters`] / [`Registry::gauges`].
#[derive(Debug, Clone, Default)]
pub struct Registry {
    cells: Arc<Cells>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self, prefix: impl AsRef<str>) -> Scope {
        Scope { registry: self.clone(), prefix: CompactString::from(prefix.as_ref()) }
    }

    /// Counter for a fully-qualified name, created on first use.
    pub fn counter(&self, name: impl AsRef<str>) -> Counter {
        let name = name.as_ref();
        if let Some(counter) = self.cells.counters.read().get(name) {
            return counter.clone();
        }
        self.cells.counters.write().entry(CompactString::from(name)).or_default().clone()
    }

    pub fn gauge(&self, name: impl AsRef<str>) -> Gauge {
        let name = name.as_ref();
        if let Some(gauge) = self.cells.gauges.read().get(name) {
            return gauge.clone();
        }
        self.cells.gauges.write().entry(CompactString::from(name)).or_default().clone()
    }

    pub fn counters(&self) -> Vec<(CompactString, u64)> {
        self.cells.counters.read().iter().map(|(name, c)| (name.clone(), c.value())).collect()
    }

    pub fn gauges(&self) -> Vec<(CompactString, u64)> {
        self.cells.gauges.read().iter().map(|(name, g)| (name.clone(), g.value())).collect()
    }
}

/// A dotted-prefix view into a [`Registry`].
#[derive(Debug, Clone)]
pub struct Scope {
    registry: Registry,
    prefix: CompactString,
}

impl Scope {
    pub fn counter(&self, name: &str) -> Counter {
        self.registry.counter(format_compact!("{}{}", self.prefix, name))
    }

    pub fn gauge(&self, name: &str) -> Gauge {
        self.registry.gauge(format_compact!("{}{}", self.prefix, name))
    }

    pub fn scope(&self, sub_prefix: &str) -> Scope {
        Scope { registry: self.registry.clone(), prefix: format_compact!("{}{}", self.prefix, sub_prefix) }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_share_cells_by_name() {
        let registry = Registry::new();
        let a = registry.counter("cluster_manager.cluster_added");
        let b = registry.counter("cluster_manager.cluster_added");
        a.inc();
        b.add(2);
        assert_eq!(a.value(), 3);
    }

    #[test]
    fn scopes_prefix_names() {
        let registry = Registry::new();
        let scope = registry.scope("cluster.").scope("backend.");
        scope.counter("upstream_cx_none_healthy").inc();
        assert_eq!(registry.counter("cluster.backend.upstream_cx_none_healthy").value(), 1);
    }

    #[test]
    fn gauge_dec_saturates_at_zero() {
        let registry = Registry::new();
        let gauge = registry.gauge("cluster_manager.total_clusters");
        gauge.dec();
        assert_eq!(gauge.value(), 0);
        gauge.set(2);
        gauge.dec();
        assert_eq!(gauge.value(), 1);
    }
}
