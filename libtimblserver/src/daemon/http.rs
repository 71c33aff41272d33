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

//! The one-shot HTTP/GET protocol.
//!
//! One GET per connection: look up the base named by the request
//! path, apply the `set`, `show` and `classify` query actions in that
//! order, answer with a single `<TiMblResult>` XML document written
//! raw on the socket, then close. Reads run under a short per-line
//! timeout so a stalled peer cannot pin a worker.

use std::{
    io::{self, BufRead, BufReader, Write},
    net::TcpStream,
};

use anyhow::Context;
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, Event},
    Writer,
};
use tracing::{debug, info};

use crate::{
    consts,
    daemon::{
        server::{BaseMap, ConnArgs, ProtocolHandler},
        session::Session,
    },
    engine::{fmt_float, Experiment, Verbosity},
};

pub struct HttpHandler;

impl ProtocolHandler for HttpHandler {
    fn name(&self) -> &'static str {
        "http"
    }

    fn on_connection(&self, bases: &BaseMap, args: ConnArgs) -> anyhow::Result<()> {
        let ConnArgs { stream, id, .. } = args;
        stream
            .set_read_timeout(Some(consts::HTTP_LINE_TIMEOUT))
            .context("setting read timeout")?;
        info!("session {} on socket, started", id);

        let mut reader = BufReader::new(stream.try_clone().context("cloning stream")?);
        let first = match read_line_timeout(&mut reader)? {
            Some(line) => line,
            None => return Ok(()),
        };
        debug!("first line='{}'", first);
        if !first.contains("HTTP") {
            return Ok(());
        }
        // drain the header lines; a timeout counts as end of headers
        while let Some(line) = read_line_timeout(&mut reader)? {
            if line.is_empty() {
                break;
            }
        }

        let target = match request_target(&first) {
            Some(target) => target,
            None => return Ok(()),
        };
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        let basename = path.rsplit('/').next().unwrap_or(path);
        debug!("base='{}' query='{}'", basename, query);

        let mut writer = stream;
        writer
            .set_write_timeout(Some(consts::HTTP_WRITE_TIMEOUT))
            .context("setting write timeout")?;

        let base = match bases.get(basename) {
            Some(base) => base,
            None => {
                debug!("invalid BASE! '{}'", basename);
                write!(writer, "invalid basename: '{basename}'\n\n")?;
                return Ok(());
            }
        };
        let mut session = Session::new(base, id);
        let actions = parse_query(query);

        // `set` failures are the only thing reported outside the
        // document, ahead of it on the raw socket
        for value in action_values(&actions, "set") {
            apply_set(&mut session, value, &mut writer)?;
        }

        let mut doc = Writer::new(Vec::new());
        doc.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
        let algorithm = session.exp.algorithm_name();
        let mut root = BytesStart::new("TiMblResult");
        root.push_attribute(("algorithm", algorithm.as_str()));
        doc.write_event(Event::Start(root))?;

        for value in action_values(&actions, "show") {
            match value {
                "settings" => session.exp.write_settings_xml(&mut doc)?,
                "weights" => session.exp.write_weights_xml(&mut doc)?,
                other => info!("don't know how to SHOW: {}", other),
            }
        }
        for value in action_values(&actions, "classify") {
            classify_to_xml(&mut session.exp, value, &mut doc)?;
        }

        doc.write_event(Event::End(BytesEnd::new("TiMblResult")))?;
        writer.write_all(&doc.into_inner())?;
        writeln!(writer)?;
        Ok(())
    }
}

// A read that runs into its timeout yields None and the handler
// proceeds as if the peer were done.
fn read_line_timeout(reader: &mut BufReader<TcpStream>) -> anyhow::Result<Option<String>> {
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
        Err(err) => Err(err).context("reading request line"),
    }
}

/// The request target between `GET` and ` HTTP`.
fn request_target(line: &str) -> Option<&str> {
    let get = line.find("GET")?;
    let http = line[get..].find(" HTTP")? + get;
    Some(line[get + 3..http].trim())
}

/// Split a query string into key/value pairs, preserving arrival
/// order. Values keep any `=` beyond the first; tokens without `=`
/// are logged and dropped.
fn parse_query(query: &str) -> Vec<(String, String)> {
    let mut actions = Vec::new();
    for token in query.split('&') {
        if token.is_empty() {
            continue;
        }
        match token.split_once('=') {
            Some((key, value)) => actions.push((String::from(key), String::from(value))),
            None => info!("unknown word in query {}", token),
        }
    }
    actions
}

fn action_values<'a>(actions: &'a [(String, String)], key: &'a str) -> impl Iterator<Item = &'a str> {
    actions.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn apply_set<W: Write>(session: &mut Session, value: &str, writer: &mut W) -> anyhow::Result<()> {
    let mut opt = String::from(value);
    if !opt.is_empty() && !opt.starts_with('-') && !opt.starts_with('+') {
        opt.insert(0, '-');
    }
    debug!("set :{}", opt);
    if !session.set_options(&opt) {
        info!(": Don't understand set='{}'", value);
        writeln!(writer, ": Don't understand set='{value}'")?;
    }
    Ok(())
}

fn classify_to_xml(
    exp: &mut Experiment,
    raw: &str,
    doc: &mut Writer<Vec<u8>>,
) -> anyhow::Result<()> {
    let mut params = url_decode(raw);
    if params.len() >= 3 {
        let bytes = params.as_bytes();
        let (first, last) = (bytes[0], bytes[params.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            params = String::from(&params[1..params.len() - 1]);
        }
    }
    debug!("command='classify' params='{}'", params);
    match exp.classify(&params) {
        Ok(result) => {
            doc.write_event(Event::Start(BytesStart::new("classification")))?;
            write_text_element(doc, "input", &params)?;
            write_text_element(doc, "category", &result.category)?;
            if exp.verbosity(Verbosity::DISTRIB) {
                write_text_element(doc, "distribution", &result.distribution)?;
            }
            if exp.verbosity(Verbosity::DISTANCE) {
                write_text_element(doc, "distance", &fmt_float(result.distance))?;
            }
            if exp.verbosity(Verbosity::CONFIDENCE) {
                write_text_element(doc, "confidence", &fmt_float(exp.confidence()))?;
            }
            if exp.verbosity(Verbosity::MATCH_DEPTH) {
                write_text_element(doc, "match_depth", &fmt_float(exp.match_depth()))?;
            }
            if exp.verbosity(Verbosity::NEAR_N) {
                exp.write_neighbors_xml(doc)?;
            }
            doc.write_event(Event::End(BytesEnd::new("classification")))?;
        }
        Err(err) => {
            debug!("classification failed: {:?}", err);
        }
    }
    Ok(())
}

fn write_text_element(doc: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> anyhow::Result<()> {
    doc.write_event(Event::Start(BytesStart::new(tag)))?;
    doc.write_event(Event::Text(quick_xml::events::BytesText::new(text)))?;
    doc.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// Decode `+` to space and `%HH` escapes; anything malformed passes
/// through untouched.
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'+' {
            out.push(b' ');
            i += 1;
        } else if bytes[i] == b'%' && i + 2 < bytes.len() {
            // decode from the raw bytes; slicing the str here could
            // land inside a multi-byte character and panic
            let escaped = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            match escaped {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn url_decoding() {
        assert_eq!(url_decode("a%2Cb%2Cc"), "a,b,c");
        assert_eq!(url_decode("one+two"), "one two");
        assert_eq!(url_decode("%41%20B"), "A B");
        // malformed escapes pass through
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("%zz"), "%zz");
        // a raw multi-byte character right after '%' must not panic
        assert_eq!(url_decode("%€"), "%€");
        assert_eq!(url_decode("caf%C3%A9"), "café");
    }

    #[test]
    fn target_extraction() {
        assert_eq!(request_target("GET /b1?classify=x HTTP/1.0"), Some("/b1?classify=x"));
        assert_eq!(request_target("GET / HTTP/1.1"), Some("/"));
        assert_eq!(request_target("POST / HTTP/1.0"), None);
        assert_eq!(request_target("GET /stuck"), None);
    }

    #[test]
    fn query_parsing_keeps_arrival_order() {
        let actions = parse_query("set=v+db&classify=a&classify=b&junk&show=settings&set=k=2");
        let sets: Vec<&str> = action_values(&actions, "set").collect();
        assert_eq!(sets, vec!["v+db", "k=2"]);
        let classifies: Vec<&str> = action_values(&actions, "classify").collect();
        assert_eq!(classifies, vec!["a", "b"]);
        assert_eq!(action_values(&actions, "junk").count(), 0);
    }

    #[test]
    fn quote_stripping() {
        use std::io::Write as _;

        let mut exp = Experiment::new(crate::engine::Algorithm::Ib1, "t");
        let mut file = tempfile::NamedTempFile::new().expect("tmp file");
        write!(file, "a,b,X\n").expect("write train data");
        exp.learn(file.path()).expect("learn");
        exp.init_experiment().expect("init");

        let mut doc = Writer::new(Vec::new());
        classify_to_xml(&mut exp, "%22a%2Cb%22", &mut doc).expect("classify");
        let xml = String::from_utf8(doc.into_inner()).expect("utf8");
        assert!(xml.contains("<input>a,b</input>"));
        assert!(xml.contains("<category>X</category>"));
    }
}
