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

use meridian_metrics::{Counter, Scope};
use serde::Deserialize;

/// Update accounting every subscription flavor keeps, under its own scope.
/// `update_rejected` is "the payload parsed but the application refused it";
/// `update_failure` is "we never got a usable payload".
#[derive(Debug, Clone)]
pub struct SubscriptionStats {
    pub update_attempt: Counter,
    pub update_success: Counter,
    pub update_rejected: Counter,
    pub update_failure: Counter,
}

impl SubscriptionStats {
    pub fn new(scope: &Scope) -> Self {
        Self {
            update_attempt: scope.counter("update_attempt"),
            update_success: scope.counter("update_success"),
            update_rejected: scope.counter("update_rejected"),
            update_failure: scope.counter("update_failure"),
        }
    }
}

/// Consumer side of a resource subscription.
pub trait SubscriptionCallbacks<R>: Send {
    /// Full state of the watched resources. An `Err` marks the update as
    /// rejected; previously applied state must be left intact by the
    /// implementor.
    fn on_config_update(&mut self, resources: Vec<R>) -> Result<(), crate::Error>;

    /// The update could not be fetched or decoded (`None` when the reason
    /// is not representable as an error value).
    fn on_config_update_failed(&mut self, error: Option<&crate::Error>);
}

/// A stream of versioned resource sets. Implementations push full-state
/// updates into the callbacks until dropped.
pub trait Subscription<R> {
    /// Begin watching. `resources` narrows the subscription where the
    /// transport supports it; flavors that always report everything ignore
    /// it.
    fn start(&mut self, resources: Vec<String>, callbacks: Box<dyn SubscriptionCallbacks<R>>);

    /// Change the watched resource set.
    fn update_resources(&mut self, resources: Vec<String>);
}

/// The wire shape of one discovery update.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryResponse<R> {
    #[serde(default)]
    pub version_info: String,
    pub resources: Vec<R>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_metrics::Registry;

    #[test]
    fn stats_land_under_the_scope() {
        let registry = Registry::new();
        let stats = SubscriptionStats::new(&registry.scope("cluster_manager.cds."));
        stats.update_attempt.inc();
        stats.update_failure.inc();
        assert_eq!(registry.counter("cluster_manager.cds.update_attempt").value(), 1);
        assert_eq!(registry.counter("cluster_manager.cds.update_failure").value(), 1);
        assert_eq!(registry.counter("cluster_manager.cds.update_success").value(), 0);
    }

    #[test]
    fn discovery_response_decodes() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Name {
            name: String,
        }
        let yaml = r#"
version_info: "7"
resources:
  - name: cluster_1
  - name: cluster_2
"#;
        let response: DiscoveryResponse<Name> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(response.version_info, "7");
        assert_eq!(response.resources.len(), 2);
    }
}
