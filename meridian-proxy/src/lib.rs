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

use meridian_configuration::{
    config::Config,
    options::{Mode, Options},
};
use meridian_lib::Result;

mod proxy;
mod runtime;

pub fn run() -> Result<()> {
    let options = Options::parse_options();
    let config = Config::new(&options)?;
    let _tracing_guard = proxy_tracing::init(&config.logging);

    match options.mode {
        Mode::Validate => proxy::validate(&config),
        Mode::Serve => proxy::serve(config, &options),
    }
}

mod proxy_tracing {
    use meridian_configuration::config::Log;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter, Registry};

    /// Keeps the non-blocking writer flushing until the process exits.
    pub struct TracingGuard {
        _guard: WorkerGuard,
    }

    pub fn init(log_conf: &Log) -> TracingGuard {
        let env_filter = EnvFilter::try_from_default_env()
            .ok()
            .or_else(|| log_conf.log_level.as_deref().map(|level| EnvFilter::builder().parse_lossy(level)))
            .unwrap_or_else(|| {
                EnvFilter::builder()
                    .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                    .parse_lossy("")
            });

        let out = std::io::stdout();
        let is_terminal = std::io::IsTerminal::is_terminal(&out);
        let (non_blocking, guard) = tracing_appender::non_blocking(out);
        let mut fmt_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_thread_names(true);
        if !is_terminal {
            fmt_layer = fmt_layer.with_ansi(false);
        }

        Registry::default().with(env_filter).with(fmt_layer).init();
        TracingGuard { _guard: guard }
    }
}
