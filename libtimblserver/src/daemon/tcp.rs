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

//! The line-oriented text protocol.

use std::io::{BufRead, BufReader, BufWriter, Write};

use anyhow::Context;
use timblserver_protocol::GREETING;
use tracing::{debug, info};

use crate::{
    daemon::{
        server::{auto_bind, BaseMap, ConnArgs, ProtocolHandler},
        session::Session,
    },
    engine::{fmt_float, Experiment, Verbosity},
};

pub struct TcpHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Classify,
    Query,
    Base,
    Set,
    Exit,
    Comment,
    Unknown,
}

// Case-insensitive prefix match, the engine's command convention:
// `classifying` still selects CLASSIFY, `class` does not.
fn check_command(com: &str) -> Command {
    let com = com.to_ascii_uppercase();
    if com.starts_with("CLASSIFY") {
        Command::Classify
    } else if com.starts_with("QUERY") {
        Command::Query
    } else if com.starts_with("BASE") {
        Command::Base
    } else if com.starts_with("SET") {
        Command::Set
    } else if com.starts_with("EXIT") {
        Command::Exit
    } else if com.starts_with('#') {
        Command::Comment
    } else {
        Command::Unknown
    }
}

fn split_line(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    }
}

impl ProtocolHandler for TcpHandler {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn on_connection(&self, bases: &BaseMap, args: ConnArgs) -> anyhow::Result<()> {
        let ConnArgs { stream, id, .. } = args;
        let reader = BufReader::new(stream.try_clone().context("cloning stream")?);
        let mut writer = BufWriter::new(stream);

        writeln!(writer, "{GREETING}")?;
        let mut session = match auto_bind(bases) {
            Some(default) => Some(Session::new(default, id)),
            None => {
                write!(writer, "available bases: ")?;
                for name in bases.keys() {
                    write!(writer, "{name} ")?;
                }
                writeln!(writer)?;
                None
            }
        };
        writer.flush()?;

        let mut processed = 0;
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                // peer hung up
                Err(_) => break,
            };
            let line = line.trim();
            debug!("line='{}'", line);
            let (command, param) = split_line(line);
            let mut keep_going = true;
            match check_command(command) {
                Command::Base => match bases.get(param) {
                    Some(base) => {
                        writeln!(writer, "selected base: '{param}'")?;
                        session = Some(Session::new(base, id));
                        info!("session {} on socket, started", id);
                    }
                    None => {
                        writeln!(writer, "ERROR {{ Unknown basename: {param}}}")?;
                    }
                },
                Command::Set => match session.as_mut() {
                    None => {
                        writeln!(writer, "you haven't selected a base yet!")?;
                    }
                    Some(session) => {
                        if session.set_options(param) {
                            debug!("setOptions: {}", param);
                            writeln!(writer, "OK")?;
                        } else {
                            writeln!(writer, "ERROR {{ set options failed: {param}}}")?;
                        }
                    }
                },
                Command::Query => match session.as_ref() {
                    None => {
                        writeln!(writer, "you haven't selected a base yet!")?;
                    }
                    Some(session) => {
                        writeln!(writer, "STATUS")?;
                        session.exp.show_settings(&mut writer)?;
                        writeln!(writer, "ENDSTATUS")?;
                    }
                },
                Command::Exit => {
                    writeln!(writer, "OK Closing")?;
                    keep_going = false;
                }
                Command::Classify => match session.as_mut() {
                    None => {
                        writeln!(writer, "you haven't selected a base yet!")?;
                    }
                    Some(session) => {
                        if classify_line(&mut session.exp, param, &mut writer)? {
                            processed += 1;
                        }
                    }
                },
                Command::Comment => {
                    writeln!(writer, "SKIP '{line}'")?;
                }
                Command::Unknown => {
                    debug!("don't understand '{}'", line);
                    writeln!(writer, "ERROR {{ Illegal instruction:'{command}' in line:{line}}}")?;
                }
            }
            writer.flush()?;
            if !keep_going {
                break;
            }
        }

        info!("session {} terminated, {} instances processed", id, processed);
        Ok(())
    }
}

/// Write one classify reply, gating each optional clause on its
/// verbosity bit. A failed classification produces no output at all;
/// the caller just moves on to the next command.
fn classify_line<W: Write>(
    exp: &mut Experiment,
    params: &str,
    writer: &mut W,
) -> anyhow::Result<bool> {
    match exp.classify(params) {
        Ok(result) => {
            write!(writer, "CATEGORY {{{}}}", result.category)?;
            if exp.verbosity(Verbosity::DISTRIB) {
                write!(writer, " DISTRIBUTION {}", result.distribution)?;
            }
            if exp.verbosity(Verbosity::DISTANCE) {
                write!(writer, " DISTANCE {{{}}}", fmt_float(result.distance))?;
            }
            if exp.verbosity(Verbosity::MATCH_DEPTH) {
                write!(writer, " MATCH_DEPTH {{{}}}", fmt_float(exp.match_depth()))?;
            }
            if exp.verbosity(Verbosity::CONFIDENCE) {
                write!(writer, " CONFIDENCE {{{}}}", fmt_float(exp.confidence()))?;
            }
            if exp.verbosity(Verbosity::NEAR_N) {
                writeln!(writer, " NEIGHBORS")?;
                exp.show_best_neighbors(writer)?;
                write!(writer, "ENDNEIGHBORS")?;
            }
            writeln!(writer)?;
            Ok(true)
        }
        Err(err) => {
            debug!("{}: Classify Failed on '{}': {:?}", exp.name(), params, err);
            Ok(false)
        }
    }
}
