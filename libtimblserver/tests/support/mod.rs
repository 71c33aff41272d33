// Copyright 2024 Google LLC
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

//! In-process server fixtures for the protocol tests: bind an
//! ephemeral listener, run the accept loop on a background thread and
//! hand tests a port to dial.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use libtimblserver::config::{Config, Protocol};
use libtimblserver::daemon::{self, Server};

/// Three features, two categories; `a,b,c` is an exact match for X.
pub const THREE_FEATURES: &str = "a,b,c,X\na,b,d,X\na,e,d,Y\nf,e,d,Y\n";

/// Two features; `a,b` hits X exactly, `d,c` hits Y exactly.
pub const TWO_FEATURES: &str = "a,b,X\na,c,X\nd,c,Y\n";

/// One whitespace-separated feature; `foo` maps to Y.
pub const ONE_FEATURE: &str = "foo Y\nbar Z\n";

pub struct TestServer {
    pub port: u16,
    // keeps the train files alive for the server's lifetime
    _dir: tempfile::TempDir,
}

/// Write the given data files, load the declared experiments and
/// serve them on an ephemeral port. Relative paths in declarations
/// resolve against the data directory.
pub fn start(
    protocol: Protocol,
    files: &[(&str, &str)],
    experiments: &[(&str, &str)],
) -> TestServer {
    let dir = tempfile::tempdir().expect("creating tmp dir");
    for (name, contents) in files {
        fs::write(dir.path().join(name), contents).expect("writing train data");
    }

    let mut config = Config::default();
    config.global.port = Some(0);
    config.global.protocol = Some(protocol);
    config.global.config_dir =
        Some(String::from(dir.path().to_str().expect("utf8 tmp dir path")));
    config.experiments = Some(
        experiments
            .iter()
            .map(|(name, opts)| (String::from(*name), String::from(*opts)))
            .collect::<BTreeMap<String, String>>(),
    );

    let bases = daemon::loader::start_experiments(&config).expect("loading experiments");
    let server = Server::new(bases, daemon::handler_for(protocol), config.maxconn(), false);
    let listener = TcpListener::bind("127.0.0.1:0").expect("binding listener");
    let port = listener.local_addr().expect("listener addr").port();
    thread::spawn(move || {
        let _ = Server::serve(server, listener);
    });
    TestServer { port, _dir: dir }
}

/// A single-default text server over the three-feature data set.
pub fn start_default(protocol: Protocol) -> TestServer {
    start(protocol, &[("default.data", THREE_FEATURES)], &[("default", "-f default.data")])
}

/// A line-oriented connection to a test server.
pub struct LineConn {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl LineConn {
    pub fn open(port: u16) -> LineConn {
        let stream = TcpStream::connect(("127.0.0.1", port)).expect("connecting to test server");
        let writer = stream.try_clone().expect("cloning stream");
        LineConn { reader: BufReader::new(stream), writer }
    }

    pub fn send_line(&mut self, line: &str) {
        writeln!(self.writer, "{line}").expect("writing line");
        self.writer.flush().expect("flushing line");
    }

    pub fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("reading line");
        String::from(line.trim_end_matches(['\r', '\n']))
    }

    /// Read lines until one equals the terminator, returning
    /// everything including the terminator.
    pub fn read_until(&mut self, terminator: &str) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line();
            let done = line == terminator;
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    /// Send raw bytes and read to EOF, for the one-shot http
    /// protocol.
    pub fn one_shot(mut self, request: &str) -> String {
        self.writer.write_all(request.as_bytes()).expect("writing request");
        self.writer.flush().expect("flushing request");
        self.writer.shutdown(std::net::Shutdown::Write).expect("shutting down write side");
        let mut response = String::new();
        self.reader.read_to_string(&mut response).expect("reading response");
        response
    }
}
