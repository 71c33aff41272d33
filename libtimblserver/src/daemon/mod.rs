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

use std::{fs, net::TcpListener, path::PathBuf, process};

use anyhow::{anyhow, Context};
use tracing::{info, instrument};

use crate::config::{self, Protocol};

mod http;
mod json;
pub mod loader;
pub mod server;
mod session;
mod signals;
mod tcp;

pub use server::{BaseMap, ConnArgs, ProtocolHandler, Server};

/// The front-end for the configured protocol.
pub fn handler_for(protocol: Protocol) -> Box<dyn ProtocolHandler> {
    match protocol {
        Protocol::Tcp => Box::new(tcp::TcpHandler),
        Protocol::Http => Box::new(http::HttpHandler),
        Protocol::Json => Box::new(json::JsonHandler),
    }
}

/// Bring the server up from a resolved config: load the bases,
/// daemonize if asked to, bind the listener and serve until a
/// termination signal arrives.
#[instrument(skip_all)]
pub fn run(config: config::Config) -> anyhow::Result<()> {
    let port = config.global.port.ok_or_else(|| anyhow!("no port configured"))?;
    let protocol = config.global.protocol.unwrap_or_default();

    info!("\n\n======================== STARTING SERVER ============================\n\n");

    // load the bases before daemonizing so startup failures land on
    // the launching terminal
    let bases = loader::start_experiments(&config)?;

    let pidfile = config.global.pidfile.clone();
    if config.global.daemonize.map(|t| t.is_yes()).unwrap_or(true) {
        let mut daemonize = daemonize::Daemonize::new();
        if let Some(pidfile) = &pidfile {
            info!("daemonizing with pid_file={:?}", pidfile);
            daemonize = daemonize.pid_file(pidfile);
        }
        daemonize.start().context("daemonizing")?;
    } else if let Some(pidfile) = &pidfile {
        fs::write(pidfile, format!("{}\n", process::id())).context("writing pidfile")?;
    }

    let listener =
        TcpListener::bind(("0.0.0.0", port)).context("binding to port")?;
    info!("{}_server listening on port {}", protocol, port);

    signals::install(pidfile.clone().map(PathBuf::from))?;

    let debug = config.global.debug.unwrap_or(false);
    let maxconn = config.maxconn();
    let server = Server::new(bases, handler_for(protocol), maxconn, debug);
    Server::serve(server, listener)?;

    if let Some(pidfile) = pidfile {
        let _ = fs::remove_file(pidfile);
    }

    Ok(())
}
