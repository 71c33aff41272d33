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

//! The reference client for the text protocol, plus the timblclient
//! command line front-end.

use std::{
    collections::BTreeSet,
    fs,
    io::{self, BufRead, BufReader, Write},
    net::TcpStream,
};

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use timblserver_protocol::{extract_code, ClassifyReply, ReplyCode, AVAILABLE_BASES_PREFIX, GREETING};
use tracing::{debug, info};

use crate::consts;

/// The command line arguments that timblclient expects.
#[derive(Parser, Debug)]
#[clap(name = "timblclient", author, version, about = "Talks to a running timblserver")]
pub struct Args {
    #[clap(short = 'n', long = "node", action, help = "Server host to connect to")]
    pub node: String,

    #[clap(short = 'p', long = "port", action, help = "Server port to connect to")]
    pub port: u16,

    #[clap(short = 'i', long = "input", action, help = "Read input from this file instead of stdin")]
    pub input: Option<String>,

    #[clap(short = 'o', long = "output", action, help = "Write output to this file instead of stdout")]
    pub output: Option<String>,

    #[clap(
        long,
        action,
        help = "Classify the input lines one by one instead of forwarding them as commands"
    )]
    pub batch: bool,

    #[clap(short = 'b', long = "base", action, help = "Select this base after connecting")]
    pub base: Option<String>,
}

/// Run the client tool with the given arguments.
pub fn run(args: Args) -> anyhow::Result<()> {
    let mut client = Client::connect(&args.node, args.port)?;
    if let Some(base) = &args.base {
        client.set_base(base)?;
    }

    let mut input: Box<dyn BufRead> = match &args.input {
        Some(path) => {
            println!("reading input from: {path}");
            Box::new(BufReader::new(
                fs::File::open(path).with_context(|| format!("opening input file {path}"))?,
            ))
        }
        None => Box::new(io::stdin().lock()),
    };
    let mut output: Box<dyn Write> = match &args.output {
        Some(path) => {
            println!("writing output to: {path}");
            Box::new(fs::File::create(path).with_context(|| format!("opening output file {path}"))?)
        }
        None => Box::new(io::stdout().lock()),
    };

    if args.batch {
        client.classify_file(&mut input, &mut output)
    } else {
        client.run_script(&mut input, &mut output)
    }
}

/// A connection to a text-protocol server.
///
/// Holds the base set the server advertised in its greeting and the
/// fields of the most recent classify reply.
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    bases: BTreeSet<String>,
    base: Option<String>,
    class: String,
    distribution: String,
    distance: String,
    neighbors: Vec<String>,
}

impl Client {
    /// Connect and shake hands: require the exact greeting line, then
    /// wait up to a second for the optional `available bases:` line.
    /// A single-default server never sends one, so a timeout just
    /// leaves the base set empty.
    pub fn connect(node: &str, port: u16) -> anyhow::Result<Client> {
        info!("starting client on node:{}, port:{}", node, port);
        let stream = TcpStream::connect((node, port))
            .with_context(|| format!("connecting to {node}:{port}"))?;
        let writer = stream.try_clone().context("cloning stream")?;
        let mut reader = BufReader::new(stream);

        let greeting = read_line(&mut reader)?
            .ok_or_else(|| anyhow!("server closed the connection before greeting"))?;
        if greeting != GREETING {
            bail!("unexpected greeting: '{}'", greeting);
        }

        reader
            .get_ref()
            .set_read_timeout(Some(consts::CLIENT_BASES_TIMEOUT))
            .context("setting read timeout")?;
        let mut bases = BTreeSet::new();
        match try_read_line(&mut reader)? {
            Some(line) if line.starts_with(AVAILABLE_BASES_PREFIX) => {
                for name in line[AVAILABLE_BASES_PREFIX.len()..].split_whitespace() {
                    bases.insert(String::from(name));
                }
            }
            Some(line) => bail!("unable to extract basenames from: '{}'", line),
            None => {}
        }
        reader.get_ref().set_read_timeout(None).context("clearing read timeout")?;

        Ok(Client {
            reader,
            writer,
            bases,
            base: None,
            class: String::new(),
            distribution: String::new(),
            distance: String::new(),
            neighbors: Vec::new(),
        })
    }

    /// The bases the server advertised; empty for a single-default
    /// server.
    pub fn base_names(&self) -> &BTreeSet<String> {
        &self.bases
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Select a base. Names the server never advertised are rejected
    /// locally without a round trip.
    pub fn set_base(&mut self, base: &str) -> anyhow::Result<()> {
        if !self.bases.contains(base) {
            bail!("'{}' is not a valid base", base);
        }
        writeln!(self.writer, "base {base}").context("writing base command")?;
        self.writer.flush()?;
        let line = read_line(&mut self.reader)?
            .ok_or_else(|| anyhow!("server closed while selecting base"))?;
        if line.contains("selected base") && line.contains(base) {
            self.base = Some(String::from(base));
            Ok(())
        } else {
            bail!("unexpected line = {}", line)
        }
    }

    /// Classify one instance line; the parsed reply is available
    /// through `class`, `distribution`, `distance` and `neighbors`
    /// until the next call.
    pub fn classify(&mut self, line: &str) -> anyhow::Result<()> {
        self.class.clear();
        self.distribution.clear();
        self.distance.clear();
        self.neighbors.clear();

        writeln!(self.writer, "classify {line}").context("writing classify command")?;
        self.writer.flush()?;
        loop {
            let response = read_line(&mut self.reader)?
                .ok_or_else(|| anyhow!("server closed during classify"))?;
            if response.is_empty() {
                continue;
            }
            match extract_code(&response) {
                (ReplyCode::Category, rest) => {
                    let reply = ClassifyReply::parse(rest)?;
                    self.class = reply.category;
                    self.distribution = reply.distribution.unwrap_or_default();
                    self.distance = reply.distance.unwrap_or_default();
                    if reply.has_neighbors {
                        loop {
                            let line = read_line(&mut self.reader)?
                                .ok_or_else(|| anyhow!("server closed inside neighbors block"))?;
                            if let (ReplyCode::EndNeighbors, _) = extract_code(&line) {
                                break;
                            }
                            self.neighbors.push(line);
                        }
                    }
                    return Ok(());
                }
                _ => bail!("unexpected response '{}'", response),
            }
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn distribution(&self) -> &str {
        &self.distribution
    }

    pub fn distance(&self) -> &str {
        &self.distance
    }

    pub fn neighbors(&self) -> &[String] {
        &self.neighbors
    }

    /// Classify every input line, echoing the line plus its result,
    /// or ` ==> ERROR` when the server rejects it.
    pub fn classify_file<R, W>(&mut self, input: &mut R, output: &mut W) -> anyhow::Result<()>
    where
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        for line in input.lines() {
            let line = line.context("reading input")?;
            match self.classify(&line) {
                Ok(()) => {
                    write!(output, "{} --> CATEGORY {{{}}}", line, self.class)?;
                    if !self.distribution.is_empty() {
                        write!(output, " DISTRIBUTION {}", self.distribution)?;
                    }
                    if !self.distance.is_empty() {
                        write!(output, " DISTANCE {{{}}}", self.distance)?;
                    }
                    if !self.neighbors.is_empty() {
                        writeln!(output, " NEIGHBORS ")?;
                        for neighbor in &self.neighbors {
                            writeln!(output, "{neighbor}")?;
                        }
                        write!(output, "ENDNEIGHBORS ")?;
                    }
                    writeln!(output)?;
                }
                Err(err) => {
                    debug!("classify failed: {:?}", err);
                    writeln!(output, "{} ==> ERROR", line)?;
                }
            }
        }
        Ok(())
    }

    /// Forward every input line to the server verbatim and print the
    /// responses, following multi-line blocks to their terminators.
    pub fn run_script<R, W>(&mut self, input: &mut R, output: &mut W) -> anyhow::Result<()>
    where
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        for request in input.lines() {
            let request = request.context("reading input")?;
            writeln!(self.writer, "{request}").context("writing script line")?;
            self.writer.flush()?;
            loop {
                let response = match read_line(&mut self.reader)? {
                    Some(response) => response,
                    None => return Ok(()),
                };
                if response.is_empty() {
                    continue;
                }
                match extract_code(&response) {
                    (ReplyCode::Ok, _) => writeln!(output, "OK")?,
                    (ReplyCode::Echo, _) => writeln!(output, "{response}")?,
                    (ReplyCode::Skip, rest) => writeln!(output, "Skipped {rest}")?,
                    (ReplyCode::Error, _) => writeln!(output, "{response}")?,
                    (ReplyCode::Category, _) => {
                        writeln!(output, "{response}")?;
                        if response.contains("NEIGHBORS") {
                            self.echo_until(output, ReplyCode::EndNeighbors)?;
                        }
                    }
                    (ReplyCode::Status, _) => {
                        writeln!(output, "{response}")?;
                        self.echo_until(output, ReplyCode::EndStatus)?;
                    }
                    (code, _) => {
                        writeln!(output, "Client is confused?? {response}")?;
                        writeln!(output, "Code was '{code:?}'")?;
                    }
                }
                break;
            }
        }
        Ok(())
    }

    fn echo_until<W>(&mut self, output: &mut W, terminator: ReplyCode) -> anyhow::Result<()>
    where
        W: Write + ?Sized,
    {
        loop {
            let line = match read_line(&mut self.reader)? {
                Some(line) => line,
                None => return Ok(()),
            };
            let (code, _) = extract_code(&line);
            writeln!(output, "{line}")?;
            if code == terminator {
                return Ok(());
            }
        }
    }
}

fn read_line(reader: &mut BufReader<TcpStream>) -> anyhow::Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).context("reading from server")?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(String::from(line.trim_end_matches(['\r', '\n']))))
}

// Like read_line, but a timed-out read yields None instead of an
// error. Only used during the greeting handshake.
fn try_read_line(reader: &mut BufReader<TcpStream>) -> anyhow::Result<Option<String>> {
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(String::from(line.trim_end_matches(['\r', '\n'])))),
        Err(err)
            if err.kind() == io::ErrorKind::WouldBlock
                || err.kind() == io::ErrorKind::TimedOut =>
        {
            Ok(None)
        }
        Err(err) => Err(err).context("reading greeting"),
    }
}
