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

//! The implementation of the timblserver and timblclient tools: a
//! multi-protocol front for pre-trained memory-based classifiers and
//! the client library that speaks its text protocol.

use std::{collections::BTreeMap, fmt, fs, io, sync::Mutex};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::fmt::format::FmtSpan;

pub mod client;
pub mod config;
mod consts;
pub mod daemon;
pub mod engine;

/// The command line arguments that timblserver expects. These can be
/// directly parsed with clap or manually constructed in order to
/// present some other user interface.
///
/// NOTE: the wrapping binary must map argument errors to exit code 1
/// itself; clap's default usage-error code differs.
#[derive(Parser, Debug, Default)]
#[clap(name = "timblserver", author, version, about = "Serves pre-trained memory-based classifiers over tcp, http or json")]
pub struct Args {
    #[clap(long, action, help = "Read server settings from the given config file")]
    pub config: Option<String>,

    #[clap(
        short = 'f',
        long,
        action,
        long_help = "Train a single base named 'default' from this data file

This is the quick alternative to --config for serving one base. Any
trailing engine options on the command line are applied to the base,
and -S is required to pick the port."
    )]
    pub file: Option<String>,

    #[clap(short = 'S', long = "port", action, help = "Run as a server on this port")]
    pub port: Option<u16>,

    #[clap(
        short = 'C',
        long = "maxconn",
        action,
        help = "Accept a maximum of this many parallel connections (default 10)"
    )]
    pub maxconn: Option<usize>,

    #[clap(long, action, value_enum, help = "Which wire protocol to serve (default tcp)")]
    pub protocol: Option<config::Protocol>,

    #[clap(long, action, help = "Store the server pid in this file")]
    pub pidfile: Option<String>,

    #[clap(long, action, help = "Log server activity to this file instead of stderr")]
    pub logfile: Option<String>,

    #[clap(long, action, value_enum, help = "Whether to detach from the terminal (default yes)")]
    pub daemonize: Option<config::Toggle>,

    #[clap(short, long, action, help = "Show more in logs")]
    pub debug: bool,

    #[clap(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        help = "Engine options for the default base, only meaningful with -f"
    )]
    pub engine_opts: Vec<String>,
}

/// A bad invocation, distinguished from startup failures so the
/// binary can exit 1 instead of 2.
#[derive(Debug)]
pub struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.0)?;
        writeln!(f, "usage:  timblserver --config=<config-file>")?;
        writeln!(f, "or      timblserver -f <data-file> -S <port> [-C <num>]")?;
        write!(f, "or see: timblserver --help for more options")
    }
}

impl std::error::Error for UsageError {}

/// Run the server with the given arguments: resolve the config,
/// initialize logging and enter the daemon.
pub fn run(args: Args) -> anyhow::Result<()> {
    let config = resolve_config(args)?;

    let trace_level = if config.global.debug.unwrap_or(false) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    if let Some(logfile) = config.global.logfile.clone() {
        let file = fs::File::create(logfile)?;
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(io::stderr)
            .init();
    }

    daemon::run(config)
}

/// Merge the command line into the config file (command line wins),
/// or synthesize a single-default config from `-f`.
fn resolve_config(args: Args) -> anyhow::Result<config::Config> {
    let mut config = match (&args.config, &args.file) {
        (Some(_), Some(_)) => {
            return Err(UsageError(String::from("give either --config or -f, not both")).into());
        }
        (Some(path), None) => config::read_config(path).context("resolving server config")?,
        (None, Some(_)) => config::Config::default(),
        (None, None) => {
            return Err(UsageError(String::from("one of --config or -f is required")).into());
        }
    };

    if let Some(file) = &args.file {
        let mut opts = format!("-f {}", shell_words::quote(file));
        for token in &args.engine_opts {
            opts.push(' ');
            opts.push_str(token);
        }
        config
            .experiments
            .get_or_insert_with(BTreeMap::new)
            .insert(String::from("default"), opts);
    }

    if let Some(port) = args.port {
        config.global.port = Some(port);
    }
    if let Some(maxconn) = args.maxconn {
        config.global.maxconn = Some(maxconn);
    }
    if let Some(protocol) = args.protocol {
        config.global.protocol = Some(protocol);
    }
    if let Some(pidfile) = args.pidfile {
        config.global.pidfile = Some(pidfile);
    }
    if let Some(logfile) = args.logfile {
        config.global.logfile = Some(logfile);
    }
    if let Some(daemonize) = args.daemonize {
        config.global.daemonize = Some(daemonize);
    }
    if args.debug {
        config.global.debug = Some(true);
    }

    if config.global.port.is_none() {
        return Err(UsageError(String::from("no port configured, use -S or the config file")).into());
    }

    Ok(config)
}
