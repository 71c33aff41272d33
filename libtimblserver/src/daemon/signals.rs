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

use std::{
    fs,
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    thread,
};

use anyhow::Context;
use signal_hook::{consts::TERM_SIGNALS, flag, iterator::Signals};
use tracing::{info, warn};

/// Install the shutdown path: the first termination signal removes
/// the pidfile and exits cleanly, a second one while that is still
/// in flight kills the process with exit code 1.
///
/// The conditional-shutdown hook must be registered before the flag
/// that arms it, or the very first signal would already take the
/// hard-exit path.
pub fn install(pidfile: Option<PathBuf>) -> anyhow::Result<()> {
    let armed = Arc::new(AtomicBool::new(false));
    for signal in TERM_SIGNALS {
        flag::register_conditional_shutdown(*signal, 1, Arc::clone(&armed))
            .context("registering hard-exit hook")?;
        flag::register(*signal, Arc::clone(&armed)).context("arming hard-exit hook")?;
    }

    let mut signals = Signals::new(TERM_SIGNALS).context("installing signal listener")?;
    thread::spawn(move || {
        if signals.forever().next().is_some() {
            if let Some(pidfile) = &pidfile {
                if let Err(err) = fs::remove_file(pidfile) {
                    warn!("could not remove pidfile {:?}: {}", pidfile, err);
                }
            }
            info!("caught termination signal, shutting down");
            std::process::exit(0);
        }
    });

    Ok(())
}
