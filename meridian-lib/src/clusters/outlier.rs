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

use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::warn;

/// Append-only sink for host health transitions, one line per event. The
/// detection algorithm lives outside this crate; the manager records
/// whatever transitions it observes.
#[derive(Debug, Clone)]
pub struct OutlierEventLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl OutlierEventLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { path: path.to_path_buf(), file: Arc::new(Mutex::new(file)) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_health_transition(&self, cluster: &str, endpoint: SocketAddr, healthy: bool) {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
        let state = if healthy { "healthy" } else { "unhealthy" };
        let mut file = self.file.lock();
        if let Err(err) = writeln!(file, "time={secs} cluster={cluster} endpoint={endpoint} state={state}") {
            warn!("failed to write outlier event for {cluster}/{endpoint}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_appended_as_lines() {
        let dir = std::env::temp_dir().join(format!("outlier-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("events.log");

        let log = OutlierEventLog::open(&path).unwrap();
        log.log_health_transition("cluster_1", "127.0.0.1:80".parse().unwrap(), false);
        log.log_health_transition("cluster_1", "127.0.0.1:80".parse().unwrap(), true);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("state=unhealthy"));
        assert!(lines[1].contains("state=healthy"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
