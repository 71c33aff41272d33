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

use std::time;

/// How long the http handler waits for each request or header line.
pub const HTTP_LINE_TIMEOUT: time::Duration = time::Duration::from_secs(1);

/// How long the http handler gives the one-shot response write.
pub const HTTP_WRITE_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// How long the client waits for the optional `available bases:`
/// greeting line before assuming a single-default server.
pub const CLIENT_BASES_TIMEOUT: time::Duration = time::Duration::from_secs(1);
