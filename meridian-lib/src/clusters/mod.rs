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

pub mod balancers;
pub(crate) mod cached_watch;
pub mod cluster;
pub mod clusters_manager;
pub mod conn_pool;
pub mod host;
pub mod init;
pub mod outlier;

use compact_str::CompactString;
use thiserror::Error;

/// Error kinds the cluster core distinguishes. Lifecycle errors abort
/// construction; data-path lookups surface `UnknownCluster`; the
/// no-healthy-host case is not an error at all (callers get `None` plus a
/// counter bump).
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("unknown cluster \"{0}\"")]
    UnknownCluster(CompactString),
    #[error("duplicate cluster \"{0}\"")]
    DuplicateCluster(CompactString),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("cluster \"{0}\" does not accept endpoint updates")]
    EndpointsNotSupported(CompactString),
}
