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

use crate::clusters::cluster::{ClusterOps, ClusterType, InitializePhase};
use compact_str::CompactString;
use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc};
use tracing::debug;

/// What the init helper needs from a cluster. `ClusterType` implements it;
/// tests drive the machine with hand-rolled targets.
pub trait InitTarget: Send + Sync {
    fn name(&self) -> CompactString;
    fn initialize_phase(&self) -> InitializePhase;
    fn initialize(&self);
    fn set_initialized_cb(&self, cb: Box<dyn FnOnce() + Send>);
}

impl InitTarget for ClusterType {
    fn name(&self) -> CompactString {
        self.info().name.clone()
    }

    fn initialize_phase(&self) -> InitializePhase {
        ClusterOps::initialize_phase(self)
    }

    fn initialize(&self) {
        ClusterOps::initialize(self);
    }

    fn set_initialized_cb(&self, cb: Box<dyn FnOnce() + Send>) {
        ClusterOps::set_initialized_cb(self, cb);
    }
}

/// The CDS gate: a discovery driver whose first applied update releases the
/// final stage of initialization.
pub trait CdsDriver: Send + Sync {
    fn initialize(&self);
    fn set_initialized_cb(&self, cb: Box<dyn FnOnce() + Send>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Static clusters are still being registered.
    Loading,
    /// Static registration done; waiting on outstanding Primary callbacks.
    WaitingForPrimaries,
    /// Primaries done; queued Secondaries are initializing.
    WaitingForSecondaries,
    /// Static warm-up done; waiting for the CDS driver's first update.
    WaitingForCds,
    /// CDS applied its first update; draining whatever it added.
    CdsInitialized,
    /// Everything signalled. Terminal: later additions never regress this.
    AllInitialized,
}

struct Inner {
    state: State,
    /// Clusters whose `initialize()` ran but whose callback is outstanding.
    pending: BTreeSet<CompactString>,
    /// Secondaries parked until their phase begins.
    secondary_queue: Vec<Arc<dyn InitTarget>>,
    cds: Option<Arc<dyn CdsDriver>>,
    initialized_cb: Option<Box<dyn FnOnce() + Send>>,
}

/// Work computed under the lock, executed after it is released. Keeping
/// cluster calls outside the lock is what lets a cluster's `initialize()`
/// turn around and call `remove_cluster` on the helper.
enum Action {
    Initialize(Arc<dyn InitTarget>),
    InitializeCds(Arc<dyn CdsDriver>),
    FireInitialized(Box<dyn FnOnce() + Send>),
}

/// Two-phase warm-up over the registered cluster set.
///
/// Primaries initialize as they are added; Secondaries queue until every
/// Primary reported ready; an optional CDS driver gates the final
/// "everything initialized" signal behind its first update, including the
/// warm-up of whatever clusters that update introduced.
#[derive(Clone)]
pub struct ClusterInitHelper {
    inner: Arc<Mutex<Inner>>,
}

impl Default for ClusterInitHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterInitHelper {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Loading,
                pending: BTreeSet::new(),
                secondary_queue: Vec::new(),
                cds: None,
                initialized_cb: None,
            })),
        }
    }

    pub fn add_cluster(&self, cluster: Arc<dyn InitTarget>) {
        let name = cluster.name();
        let inner = Arc::clone(&self.inner);
        let cb_name = name.clone();
        cluster.set_initialized_cb(Box::new(move || on_cluster_initialized(&inner, &cb_name)));

        let actions = {
            let mut g = self.inner.lock();
            match cluster.initialize_phase() {
                InitializePhase::Primary => {
                    g.pending.insert(name);
                    vec![Action::Initialize(cluster)]
                },
                InitializePhase::Secondary => match g.state {
                    State::Loading | State::WaitingForPrimaries | State::WaitingForCds => {
                        g.secondary_queue.push(cluster);
                        Vec::new()
                    },
                    State::CdsInitialized if !g.pending.is_empty() => {
                        g.secondary_queue.push(cluster);
                        Vec::new()
                    },
                    State::WaitingForSecondaries | State::CdsInitialized | State::AllInitialized => {
                        g.pending.insert(name);
                        vec![Action::Initialize(cluster)]
                    },
                },
            }
        };
        run_actions(actions);
    }

    /// Safe to call from inside the removed cluster's own `initialize()`.
    pub fn remove_cluster(&self, name: &str) {
        let actions = {
            let mut g = self.inner.lock();
            g.pending.remove(name);
            g.secondary_queue.retain(|c| c.name() != name);
            maybe_finish(&mut g)
        };
        run_actions(actions);
    }

    pub fn set_cds(&self, cds: Arc<dyn CdsDriver>) {
        let inner = Arc::clone(&self.inner);
        cds.set_initialized_cb(Box::new(move || on_cds_initialized(&inner)));
        self.inner.lock().cds = Some(cds);
    }

    /// All static clusters are registered; start gating on their callbacks.
    pub fn on_static_load_complete(&self) {
        let actions = {
            let mut g = self.inner.lock();
            debug_assert_eq!(g.state, State::Loading);
            g.state = State::WaitingForPrimaries;
            maybe_finish(&mut g)
        };
        run_actions(actions);
    }

    /// At most one fire. Registered after the fact, the callback runs
    /// synchronously right here.
    pub fn set_initialized_cb(&self, cb: Box<dyn FnOnce() + Send>) {
        {
            let mut g = self.inner.lock();
            if g.state != State::AllInitialized {
                g.initialized_cb = Some(cb);
                return;
            }
        }
        cb();
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().state == State::AllInitialized
    }
}

fn on_cluster_initialized(inner: &Arc<Mutex<Inner>>, name: &str) {
    let actions = {
        let mut g = inner.lock();
        g.pending.remove(name);
        maybe_finish(&mut g)
    };
    run_actions(actions);
}

fn on_cds_initialized(inner: &Arc<Mutex<Inner>>) {
    let actions = {
        let mut g = inner.lock();
        debug!("cds applied its first update");
        g.state = State::CdsInitialized;
        maybe_finish(&mut g)
    };
    run_actions(actions);
}

fn maybe_finish(g: &mut Inner) -> Vec<Action> {
    let mut actions = Vec::new();
    loop {
        match g.state {
            State::WaitingForPrimaries if g.pending.is_empty() => {
                g.state = State::WaitingForSecondaries;
                if !g.secondary_queue.is_empty() {
                    drain_secondaries(g, &mut actions);
                    break;
                }
                // Nothing queued; fall through to the next stage.
            },
            State::WaitingForSecondaries if g.pending.is_empty() => {
                if let Some(cds) = g.cds.clone() {
                    g.state = State::WaitingForCds;
                    actions.push(Action::InitializeCds(cds));
                } else {
                    finish(g, &mut actions);
                }
                break;
            },
            State::CdsInitialized if g.pending.is_empty() => {
                if !g.secondary_queue.is_empty() {
                    drain_secondaries(g, &mut actions);
                } else {
                    finish(g, &mut actions);
                }
                break;
            },
            _ => break,
        }
    }
    actions
}

fn drain_secondaries(g: &mut Inner, actions: &mut Vec<Action>) {
    for cluster in std::mem::take(&mut g.secondary_queue) {
        g.pending.insert(cluster.name());
        actions.push(Action::Initialize(cluster));
    }
}

fn finish(g: &mut Inner, actions: &mut Vec<Action>) {
    debug!("all clusters initialized");
    g.state = State::AllInitialized;
    if let Some(cb) = g.initialized_cb.take() {
        actions.push(Action::FireInitialized(cb));
    }
}

fn run_actions(actions: Vec<Action>) {
    for action in actions {
        match action {
            Action::Initialize(cluster) => cluster.initialize(),
            Action::InitializeCds(cds) => cds.initialize(),
            Action::FireInitialized(cb) => cb(),
        }
    }
}
