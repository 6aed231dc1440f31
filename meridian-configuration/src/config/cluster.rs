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
use serde::{Deserialize, Serialize};
use std::{fmt::Display, net::SocketAddr, time::Duration};

/// Longest accepted cluster name. Stats sinks flatten the name into a metric
/// prefix, which is where the bound comes from.
pub const MAX_CLUSTER_NAME_LEN: usize = 60;

fn is_default<T: Default + PartialEq>(t: &T) -> bool {
    t == &T::default()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Cluster {
    pub name: CompactString,
    #[serde(rename = "type")]
    pub discovery: DiscoveryType,
    pub connect_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "is_default")]
    pub lb_type: LbPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<HostUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_connection_buffer_limit_bytes: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_resolvers: Vec<SocketAddr>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub dns_refresh_rate: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlier_detection: Option<OutlierDetection>,
}

pub const DEFAULT_DNS_REFRESH_RATE: Duration = Duration::from_secs(5);

impl Cluster {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn dns_refresh_rate(&self) -> Duration {
        self.dns_refresh_rate.unwrap_or(DEFAULT_DNS_REFRESH_RATE)
    }

    /// Shape checks that do not depend on the rest of the bootstrap.
    pub fn validate(&self) -> Result<(), ClusterConfigError> {
        if self.name.is_empty() || self.name.len() > MAX_CLUSTER_NAME_LEN {
            return Err(ClusterConfigError::InvalidName(self.name.clone()));
        }
        if !self.name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
            return Err(ClusterConfigError::InvalidName(self.name.clone()));
        }
        match self.discovery {
            DiscoveryType::Static | DiscoveryType::StrictDns => {
                if self.hosts.is_empty() {
                    return Err(ClusterConfigError::MissingHosts(self.name.clone()));
                }
            },
            DiscoveryType::LogicalDns => {
                if self.hosts.len() != 1 {
                    return Err(ClusterConfigError::LogicalDnsSingleHost(self.name.clone()));
                }
            },
            DiscoveryType::Eds | DiscoveryType::OriginalDst => {
                if !self.hosts.is_empty() {
                    return Err(ClusterConfigError::UnexpectedHosts(self.name.clone()));
                }
            },
        }
        match (self.discovery, self.lb_type) {
            (DiscoveryType::OriginalDst, LbPolicy::OriginalDstLb) => {},
            (DiscoveryType::OriginalDst, _) | (_, LbPolicy::OriginalDstLb) => {
                return Err(ClusterConfigError::LbTypeMismatch(self.name.clone()));
            },
            _ => {},
        }
        for host in &self.hosts {
            host.parse().map_err(|_| ClusterConfigError::InvalidHostUrl(host.url.clone()))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ClusterConfigError {
    InvalidName(CompactString),
    MissingHosts(CompactString),
    UnexpectedHosts(CompactString),
    LogicalDnsSingleHost(CompactString),
    LbTypeMismatch(CompactString),
    InvalidHostUrl(CompactString),
}

impl Display for ClusterConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid cluster name \"{name}\""),
            Self::MissingHosts(name) => write!(f, "cluster \"{name}\" requires at least one host"),
            Self::UnexpectedHosts(name) => write!(f, "cluster \"{name}\" may not configure static hosts"),
            Self::LogicalDnsSingleHost(name) => {
                write!(f, "logical_dns cluster \"{name}\" requires exactly one host")
            },
            Self::LbTypeMismatch(name) => {
                write!(f, "cluster \"{name}\": original_dst_lb and the original_dst type imply each other")
            },
            Self::InvalidHostUrl(url) => write!(f, "invalid host url \"{url}\""),
        }
    }
}

impl std::error::Error for ClusterConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryType {
    Static,
    StrictDns,
    LogicalDns,
    Eds,
    OriginalDst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LbPolicy {
    #[default]
    RoundRobin,
    LeastRequest,
    Random,
    RingHash,
    OriginalDstLb,
}

/// A `tcp://host:port` endpoint reference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostUrl {
    pub url: CompactString,
}

impl HostUrl {
    pub fn new(url: impl Into<CompactString>) -> Self {
        Self { url: url.into() }
    }

    /// Splits into `(hostname, port)`. The hostname may be an IP literal or
    /// a DNS name; which one is acceptable depends on the cluster type.
    pub fn parse(&self) -> Result<(CompactString, u16), CompactString> {
        let rest = self.url.strip_prefix("tcp://").ok_or_else(|| self.url.clone())?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(|| self.url.clone())?;
        if host.is_empty() {
            return Err(self.url.clone());
        }
        let port: u16 = port.parse().map_err(|_| self.url.clone())?;
        Ok((host.into(), port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointHealth {
    #[default]
    Healthy,
    Unhealthy,
}

impl EndpointHealth {
    pub fn is_healthy(self) -> bool {
        self == EndpointHealth::Healthy
    }
}

/// One endpoint of an EDS assignment.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LbEndpoint {
    pub address: SocketAddr,
    #[serde(default, skip_serializing_if = "is_default")]
    pub health_status: EndpointHealth,
    #[serde(default = "default_weight")]
    pub load_balancing_weight: u32,
    #[serde(default, skip_serializing_if = "is_default")]
    pub canary: bool,
    #[serde(default, skip_serializing_if = "is_default")]
    pub zone: CompactString,
}

fn default_weight() -> u32 {
    1
}

/// The endpoint set pushed for an EDS cluster.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ClusterLoadAssignment {
    pub endpoints: Vec<LbEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HealthCheck {
    #[serde(rename = "type")]
    pub protocol: HealthCheckProtocol,
    pub timeout_ms: u64,
    pub interval_ms: u64,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<CompactString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckProtocol {
    Tcp,
    Http,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OutlierDetection {
    #[serde(default = "default_consecutive_5xx")]
    pub consecutive_5xx: u32,
}

fn default_consecutive_5xx() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(name: &str, discovery: DiscoveryType, hosts: &[&str]) -> Cluster {
        Cluster {
            name: name.into(),
            discovery,
            connect_timeout_ms: 250,
            lb_type: LbPolicy::default(),
            hosts: hosts.iter().map(|h| HostUrl::new(*h)).collect(),
            per_connection_buffer_limit_bytes: None,
            dns_resolvers: Vec::new(),
            dns_refresh_rate: None,
            health_check: None,
            outlier_detection: None,
        }
    }

    #[test]
    fn host_url_parsing() {
        assert_eq!(HostUrl::new("tcp://127.0.0.1:80").parse().unwrap(), ("127.0.0.1".into(), 80));
        assert_eq!(HostUrl::new("tcp://localhost:11001").parse().unwrap(), ("localhost".into(), 11001));
        assert!(HostUrl::new("udp://127.0.0.1:80").parse().is_err());
        assert!(HostUrl::new("tcp://127.0.0.1").parse().is_err());
        assert!(HostUrl::new("tcp://:80").parse().is_err());
    }

    #[test]
    fn name_bounds_and_charset() {
        let long = "x".repeat(MAX_CLUSTER_NAME_LEN + 1);
        assert!(cluster(&long, DiscoveryType::Static, &["tcp://127.0.0.1:80"]).validate().is_err());
        assert!(cluster("cluster:", DiscoveryType::Static, &["tcp://127.0.0.1:80"]).validate().is_err());
        assert!(cluster("cluster_1.a-b", DiscoveryType::Static, &["tcp://127.0.0.1:80"]).validate().is_ok());
    }

    #[test]
    fn per_type_host_requirements() {
        assert!(cluster("a", DiscoveryType::Static, &[]).validate().is_err());
        assert!(cluster("a", DiscoveryType::Eds, &["tcp://127.0.0.1:80"]).validate().is_err());
        assert!(cluster("a", DiscoveryType::LogicalDns, &["tcp://a:1", "tcp://b:2"]).validate().is_err());
        assert!(cluster("a", DiscoveryType::LogicalDns, &["tcp://example.com:80"]).validate().is_ok());
    }

    #[test]
    fn original_dst_requires_matching_lb() {
        let mut c = cluster("a", DiscoveryType::OriginalDst, &[]);
        assert!(c.validate().is_err());
        c.lb_type = LbPolicy::OriginalDstLb;
        assert!(c.validate().is_ok());
        let mut c = cluster("a", DiscoveryType::Static, &["tcp://127.0.0.1:80"]);
        c.lb_type = LbPolicy::OriginalDstLb;
        assert!(c.validate().is_err());
    }

    #[test]
    fn deserializes_spec_document() {
        let yaml = r#"
name: cluster_1
type: strict_dns
connect_timeout_ms: 250
lb_type: round_robin
dns_resolvers: ["1.2.3.4:80"]
hosts:
  - url: "tcp://localhost:11001"
"#;
        let c: Cluster = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.discovery, DiscoveryType::StrictDns);
        assert_eq!(c.connect_timeout(), Duration::from_millis(250));
        assert_eq!(c.hosts.len(), 1);
        c.validate().unwrap();
    }
}
