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

//! The timblserver launcher: exit 0 on success (including help and
//! version), 1 on a bad invocation, 2 or more on startup failures.

use clap::error::ErrorKind;
use clap::Parser;

fn main() {
    let args = match libtimblserver::Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => std::process::exit(0),
                _ => std::process::exit(1),
            }
        }
    };

    if let Err(err) = libtimblserver::run(args) {
        if let Some(usage) = err.downcast_ref::<libtimblserver::UsageError>() {
            eprintln!("{usage}");
            std::process::exit(1);
        }
        eprintln!("{err:?}");
        std::process::exit(2);
    }
}
