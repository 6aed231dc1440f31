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

use tokio::runtime::{Builder, Runtime};

/// One shared runtime: the main task owns the cluster manager mutations,
/// worker threads carry the data path.
pub fn build_tokio_runtime(thread_name: &str, num_threads: usize) -> Runtime {
    let (mut builder, _current_thread) = if num_threads <= 1 {
        let mut b = Builder::new_current_thread();
        b.enable_all();
        (b, true)
    } else {
        let mut b = Builder::new_multi_thread();
        b.worker_threads(num_threads).max_blocking_threads(num_threads).enable_all();
        (b, false)
    };

    #[allow(clippy::expect_used)]
    builder.thread_name(thread_name).build().expect("failed to build basic runtime")
}
