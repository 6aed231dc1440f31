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

pub mod bootstrap;
pub mod cluster;
pub mod log;

pub use bootstrap::{Bootstrap, ClusterManagerConfig, Node};
pub use cluster::Cluster;
pub use log::Log;

use crate::{options::Options, Result};
use meridian_error::ResultExtension;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fs::File, path::Path};

/// Top-level configuration file: logging knobs plus the bootstrap document.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub logging: Log,
    #[serde(default)]
    pub bootstrap: Bootstrap,
}

impl Config {
    pub fn new(opt: &Options) -> Result<Self> {
        let mut config = match (&opt.config_path, &opt.bootstrap_path) {
            (None, None) => return Err("no config file specified".into()),
            (Some(path), _) => deserialize_yaml::<Config>(path)
                .with_context(|| format!("failed to read config from \"{}\"", path.display()))?,
            (None, Some(path)) => {
                // A bare cluster-manager document, no outer wrapper.
                let cluster_manager = deserialize_yaml::<ClusterManagerConfig>(path)
                    .with_context(|| format!("failed to read bootstrap from \"{}\"", path.display()))?;
                Config { bootstrap: Bootstrap { cluster_manager, node: None }, ..Config::default() }
            },
        };
        config.apply_options(opt);
        config.bootstrap.cluster_manager.validate()?;
        Ok(config)
    }

    fn apply_options(&mut self, opt: &Options) {
        if let Some(level) = &opt.log_level {
            self.logging.log_level = Some(level.clone());
        }
        if opt.service_cluster.is_some() || opt.service_node.is_some() || opt.service_zone.is_some() {
            let node = self.bootstrap.node.get_or_insert_with(Node::default);
            if let Some(cluster) = &opt.service_cluster {
                node.cluster = cluster.as_str().into();
            }
            if let Some(id) = &opt.service_node {
                node.id = id.as_str().into();
            }
            if let Some(zone) = &opt.service_zone {
                node.zone = zone.as_str().into();
            }
        }
    }
}

pub fn deserialize_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    serde_path_to_error::deserialize(serde_yaml::Deserializer::from_reader(&file)).map_err(crate::Error::from)
}
