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

use crate::subscription::{DiscoveryResponse, Subscription, SubscriptionCallbacks, SubscriptionStats};
use meridian_error::ResultExtension;
use serde::de::DeserializeOwned;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, warn};

/// Filesystem flavor of the subscription contract: one file holds the full
/// discovery response and is replaced atomically by rename. Only
/// moved-into-place events trigger a re-read, so a writer streaming into a
/// temp file is never observed half-written.
pub struct FilesystemSubscription<R> {
    path: PathBuf,
    stats: SubscriptionStats,
    stop: Arc<Notify>,
    task: Option<JoinHandle<()>>,
    _marker: std::marker::PhantomData<fn() -> R>,
}

impl<R> FilesystemSubscription<R> {
    pub fn new(path: PathBuf, stats: SubscriptionStats) -> Self {
        Self { path, stats, stop: Arc::new(Notify::new()), task: None, _marker: std::marker::PhantomData }
    }

    pub fn stats(&self) -> &SubscriptionStats {
        &self.stats
    }
}

impl<R> Drop for FilesystemSubscription<R> {
    fn drop(&mut self) {
        self.stop.notify_waiters();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<R: DeserializeOwned + Send + 'static> Subscription<R> for FilesystemSubscription<R> {
    fn start(&mut self, _resources: Vec<String>, mut callbacks: Box<dyn SubscriptionCallbacks<R>>) {
        // The watched file reports every resource; the requested name set is
        // irrelevant for this flavor.
        refresh(&self.path, &self.stats, callbacks.as_mut());

        let path = self.path.clone();
        let stats = self.stats.clone();
        let stop = Arc::clone(&self.stop);
        self.task = Some(tokio::spawn(async move {
            watch_loop(path, stats, callbacks, stop).await;
        }));
    }

    fn update_resources(&mut self, _resources: Vec<String>) {}
}

/// One read-parse-apply pass with the original's accounting: parse or IO
/// trouble is a failure, an applied-but-refused payload is a rejection.
pub(crate) fn refresh<R: DeserializeOwned>(
    path: &Path,
    stats: &SubscriptionStats,
    callbacks: &mut dyn SubscriptionCallbacks<R>,
) {
    debug!("filesystem config refresh for {}", path.display());
    stats.update_attempt.inc();

    let parsed: crate::Result<DiscoveryResponse<R>> = (|| {
        let file = std::fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        serde_yaml::from_reader(file).with_context(|| format!("cannot decode {}", path.display()))
    })();

    match parsed {
        Ok(response) => match callbacks.on_config_update(response.resources) {
            Ok(()) => {
                stats.update_success.inc();
            },
            Err(err) => {
                warn!("filesystem config update rejected: {err}");
                stats.update_rejected.inc();
                callbacks.on_config_update_failed(Some(&err));
            },
        },
        Err(err) => {
            warn!("filesystem config update failure: {err}");
            stats.update_failure.inc();
            callbacks.on_config_update_failed(Some(&err));
        },
    }
}

#[cfg(target_os = "linux")]
async fn watch_loop<R: DeserializeOwned>(
    path: PathBuf,
    stats: SubscriptionStats,
    mut callbacks: Box<dyn SubscriptionCallbacks<R>>,
    stop: Arc<Notify>,
) {
    use futures::StreamExt;
    use inotify::{Inotify, WatchMask};

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let file_name = path.file_name().map(std::ffi::OsStr::to_os_string);

    let stream = Inotify::init()
        .and_then(|inotify| {
            inotify.watches().add(&dir, WatchMask::MOVED_TO)?;
            inotify.into_event_stream([0u8; 4096])
        });
    let mut stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            warn!("cannot watch {}: {err}; filesystem updates disabled", dir.display());
            return;
        },
    };

    loop {
        tokio::select! {
            _ = stop.notified() => break,
            event = stream.next() => match event {
                Some(Ok(event)) => {
                    if event.name.as_deref().map(std::ffi::OsStr::to_os_string) == file_name {
                        refresh(&path, &stats, callbacks.as_mut());
                    }
                },
                Some(Err(err)) => {
                    warn!("watch error on {}: {err}", dir.display());
                },
                None => break,
            },
        }
    }
}

/// Platforms without rename notification fall back to polling the file's
/// modification time.
#[cfg(not(target_os = "linux"))]
async fn watch_loop<R: DeserializeOwned>(
    path: PathBuf,
    stats: SubscriptionStats,
    mut callbacks: Box<dyn SubscriptionCallbacks<R>>,
    stop: Arc<Notify>,
) {
    use std::time::Duration;

    const POLL_INTERVAL: Duration = Duration::from_secs(1);
    let mut last_mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
                if mtime != last_mtime {
                    last_mtime = mtime;
                    refresh(&path, &stats, callbacks.as_mut());
                }
            },
        }
    }
}
