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

use crate::config::cluster::{Cluster, DiscoveryType};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn is_default<T: Default + PartialEq>(t: &T) -> bool {
    t == &T::default()
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Bootstrap {
    #[serde(default, skip_serializing_if = "is_default")]
    pub cluster_manager: ClusterManagerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Node {
    #[serde(default, skip_serializing_if = "is_default")]
    pub id: CompactString,
    #[serde(default, skip_serializing_if = "is_default")]
    pub cluster: CompactString,
    #[serde(default, skip_serializing_if = "is_default")]
    pub zone: CompactString,
}

/// The cluster-manager document: static clusters plus the optional discovery
/// sources feeding them at runtime.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ClusterManagerConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<Cluster>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cds: Option<CdsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sds: Option<SdsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_cluster_name: Option<CompactString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlier_detection: Option<OutlierEventLogConfig>,
}

impl ClusterManagerConfig {
    /// Per-cluster shape checks plus the cross-cluster constraints that can
    /// be decided from the document alone. Registry-level constraints
    /// (duplicate names, local cluster presence) belong to manager
    /// construction.
    pub fn validate(&self) -> crate::Result<()> {
        for cluster in &self.clusters {
            cluster.validate()?;
        }
        if let Some(sds) = &self.sds {
            sds.cluster.validate()?;
        }
        if let Some(cds) = &self.cds {
            if let Some(cluster) = &cds.cluster {
                cluster.validate()?;
            }
            if cds.cluster.is_none() && cds.path.is_none() {
                return Err("cds requires either a cluster or a path source".into());
            }
        }
        let needs_sds = self.clusters.iter().any(|c| c.discovery == DiscoveryType::Eds);
        if needs_sds && self.sds.is_none() {
            return Err("eds clusters require an sds source to be configured".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CdsConfig {
    /// Cluster hosting a streaming discovery service. Accepted in config;
    /// only the filesystem source is wired in this build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<Cluster>,
    /// Filesystem discovery source: a single file replaced by rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SdsConfig {
    pub cluster: Cluster,
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,
}

fn default_refresh_delay_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OutlierEventLogConfig {
    pub event_log_path: PathBuf,
}
