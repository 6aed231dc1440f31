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

use crate::clusters::host::{HostRef, HostSet};
use meridian_configuration::config::cluster::LbPolicy;
use rand::Rng;
use std::{
    hash::{Hash, Hasher},
    net::SocketAddr,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Per-request routing inputs a balancer may consult.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadBalancerContext {
    /// Hash computed by the routing layer (ring-hash policies).
    pub hash: Option<u64>,
    /// Downstream peer address (original-destination routing).
    pub downstream_remote_address: Option<SocketAddr>,
}

impl LoadBalancerContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_hash(hash: u64) -> Self {
        Self { hash: Some(hash), ..Self::default() }
    }
}

/// Host selection over a published snapshot. Only healthy hosts are
/// eligible; an empty healthy set yields no host, which the caller reports
/// through the cluster's `upstream_cx_none_healthy` counter.
#[derive(Debug)]
pub enum BalancerType {
    RoundRobin(RoundRobinBalancer),
    LeastRequest,
    Random,
    RingHash,
    /// Selection is performed by the original-destination cluster itself;
    /// the balancer has no say.
    OriginalDstLb,
}

impl BalancerType {
    pub fn for_policy(policy: LbPolicy) -> Self {
        match policy {
            LbPolicy::RoundRobin => BalancerType::RoundRobin(RoundRobinBalancer::default()),
            LbPolicy::LeastRequest => BalancerType::LeastRequest,
            LbPolicy::Random => BalancerType::Random,
            LbPolicy::RingHash => BalancerType::RingHash,
            LbPolicy::OriginalDstLb => BalancerType::OriginalDstLb,
        }
    }

    pub fn choose(&self, set: &HostSet, ctx: &LoadBalancerContext) -> Option<HostRef> {
        let eligible = &set.healthy;
        if eligible.is_empty() {
            return None;
        }
        match self {
            BalancerType::RoundRobin(rr) => rr.choose(eligible),
            BalancerType::LeastRequest => choose_least_request(eligible),
            BalancerType::Random => {
                let idx = rand::thread_rng().gen_range(0..eligible.len());
                Some(eligible[idx].clone())
            },
            BalancerType::RingHash => choose_ring_hash(eligible, ctx.hash),
            BalancerType::OriginalDstLb => None,
        }
    }
}

/// Weighted round robin, degenerating to plain rotation for uniform weights.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    index: AtomicUsize,
}

impl RoundRobinBalancer {
    fn choose(&self, eligible: &[HostRef]) -> Option<HostRef> {
        let total_weight: u64 = eligible.iter().map(|h| u64::from(h.weight)).sum();
        if total_weight == 0 {
            return None;
        }
        let tick = self.index.fetch_add(1, Ordering::Relaxed) as u64 % total_weight;
        let mut cursor = 0u64;
        for host in eligible {
            cursor += u64::from(host.weight);
            if tick < cursor {
                return Some(host.clone());
            }
        }
        None
    }
}

/// Power-of-two-choices over in-flight request counts.
fn choose_least_request(eligible: &[HostRef]) -> Option<HostRef> {
    if eligible.len() == 1 {
        return Some(eligible[0].clone());
    }
    let mut rng = rand::thread_rng();
    let a = rng.gen_range(0..eligible.len());
    let mut b = rng.gen_range(0..eligible.len() - 1);
    if b >= a {
        b += 1;
    }
    let pick = if eligible[a].active_requests() <= eligible[b].active_requests() { a } else { b };
    Some(eligible[pick].clone())
}

/// Smallest clockwise distance on a hash ring of host addresses. The request
/// hash must be supplied by the routing layer; without one we fall back to a
/// random point so traffic still spreads.
fn choose_ring_hash(eligible: &[HostRef], hash: Option<u64>) -> Option<HostRef> {
    let point = hash.unwrap_or_else(|| rand::thread_rng().gen());
    eligible
        .iter()
        .min_by_key(|host| {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            host.address.hash(&mut hasher);
            hasher.finish().wrapping_sub(point)
        })
        .cloned()
}
