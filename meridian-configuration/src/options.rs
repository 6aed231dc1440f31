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

use std::{num::NonZeroUsize, path::PathBuf};

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Run the proxy.
    Serve,
    /// Load and construct everything, then exit without any network side effects.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IpVersion {
    V4,
    V6,
}

#[derive(Parser, Debug, Clone)]
pub struct Options {
    #[arg(help = "Configuration file", short = 'c', long = "config-path")]
    pub config_path: Option<PathBuf>,
    #[arg(help = "Bare cluster-manager bootstrap document", long = "bootstrap-path")]
    pub bootstrap_path: Option<PathBuf>,
    #[arg(help = "Operation mode", long = "mode", value_enum, default_value = "serve")]
    pub mode: Mode,
    #[arg(help = "Number of worker threads", long = "concurrency")]
    pub concurrency: Option<NonZeroUsize>,
    #[arg(help = "Base ID for shared memory regions", long = "base-id", default_value_t = 0)]
    pub base_id: u32,
    #[arg(help = "Hot restart epoch", long = "restart-epoch", default_value_t = 0)]
    pub restart_epoch: u32,
    #[arg(help = "Drain time in seconds", long = "drain-time-s", default_value_t = 600)]
    pub drain_time_s: u64,
    #[arg(help = "Parent shutdown time in seconds", long = "parent-shutdown-time-s", default_value_t = 900)]
    pub parent_shutdown_time_s: u64,
    #[arg(help = "Log level override", long = "log-level")]
    pub log_level: Option<String>,
    #[arg(help = "IP version for local addresses", long = "local-address-ip-version", value_enum, default_value = "v4")]
    pub local_address_ip_version: IpVersion,
    #[arg(help = "Service cluster reported to discovery services", long = "service-cluster")]
    pub service_cluster: Option<String>,
    #[arg(help = "Service node reported to discovery services", long = "service-node")]
    pub service_node: Option<String>,
    #[arg(help = "Service zone reported to discovery services", long = "service-zone")]
    pub service_zone: Option<String>,
}

impl Options {
    pub fn parse_options() -> Self {
        Options::parse()
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { config_path: Some(path.into()), ..Self::empty() }
    }

    pub fn from_bootstrap_path(path: impl Into<PathBuf>) -> Self {
        Self { bootstrap_path: Some(path.into()), ..Self::empty() }
    }

    fn empty() -> Self {
        Self {
            config_path: None,
            bootstrap_path: None,
            mode: Mode::Serve,
            concurrency: None,
            base_id: 0,
            restart_epoch: 0,
            drain_time_s: 600,
            parent_shutdown_time_s: 900,
            log_level: None,
            local_address_ip_version: IpVersion::V4,
            service_cluster: None,
            service_node: None,
            service_zone: None,
        }
    }
}
