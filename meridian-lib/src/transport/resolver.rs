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

// Resolver setup based on
// https://github.com/hickory-dns/hickory-dns/blob/v0.24.1/crates/resolver/examples/global_resolver.rs

use futures::{future::BoxFuture, FutureExt};
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
    TokioAsyncResolver,
};
use std::{
    net::{IpAddr, SocketAddr},
    sync::OnceLock,
};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("dns resolution failed for {host}: {reason}")]
pub struct ResolveError {
    pub host: String,
    pub reason: String,
}

/// Name resolution seam used by the DNS cluster types. Production code uses
/// [`SystemDnsResolver`]; tests drive resolution rounds with a canned
/// implementation.
pub trait ResolveHost: Send + Sync {
    fn resolve(&self, host: &str) -> BoxFuture<'static, Result<Vec<IpAddr>, ResolveError>>;
}

/// Hickory-backed resolver. Uses the system configuration unless the cluster
/// names its own `dns_resolvers`.
pub struct SystemDnsResolver {
    resolver: OnceLock<TokioAsyncResolver>,
    name_servers: Vec<SocketAddr>,
}

impl SystemDnsResolver {
    pub fn new(name_servers: Vec<SocketAddr>) -> Self {
        Self { resolver: OnceLock::new(), name_servers }
    }

    fn resolver(&self) -> &TokioAsyncResolver {
        // Initialized lazily from an async context so a Tokio runtime is
        // guaranteed to be running when the resolver spins up its sockets.
        self.resolver.get_or_init(|| {
            if self.name_servers.is_empty() {
                match TokioAsyncResolver::from_system_conf(TokioConnectionProvider::default()) {
                    Ok(resolver) => resolver,
                    Err(err) => panic!("Could not initialize the DNS resolver: {err}"),
                }
            } else {
                let mut config = ResolverConfig::new();
                for address in &self.name_servers {
                    config.add_name_server(NameServerConfig::new(*address, Protocol::Udp));
                }
                TokioAsyncResolver::tokio(config, ResolverOpts::default())
            }
        })
    }
}

impl ResolveHost for SystemDnsResolver {
    fn resolve(&self, host: &str) -> BoxFuture<'static, Result<Vec<IpAddr>, ResolveError>> {
        // IP literals skip the network entirely.
        if let Ok(ip) = host.parse::<IpAddr>() {
            return async move { Ok(vec![ip]) }.boxed();
        }
        let host = host.to_owned();
        let resolver = self.resolver().clone();
        async move {
            match resolver.lookup_ip(host.clone()).await {
                Ok(response) => Ok(response.into_iter().collect()),
                Err(err) => Err(ResolveError { host, reason: err.to_string() }),
            }
        }
        .boxed()
    }
}
