// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use tracing::{debug, info};

use crate::engine::Experiment;

/// One session's private binding to a base.
///
/// Construction deep-clones the base, so option changes and per-query
/// scratch never reach the shared map. Rebinding a session replaces
/// the whole `Session`, dropping the previous clone; there is never
/// more than one clone per connection.
pub struct Session {
    pub exp: Experiment,
    pub id: usize,
}

impl Session {
    pub fn new(base: &Experiment, id: usize) -> Session {
        info!("session {} bound to base '{}'", id, base.name());
        Session { exp: base.clone_for_session(id), id }
    }

    /// Parse-then-confirm option update; a rejection leaves the
    /// clone's options exactly as they were.
    pub fn set_options(&mut self, spec: &str) -> bool {
        match self.exp.set_options(spec) {
            Ok(()) => true,
            Err(err) => {
                debug!("session {}: set options '{}' rejected: {:?}", self.id, spec, err);
                false
            }
        }
    }
}
