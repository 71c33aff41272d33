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

//! The line-delimited JSON protocol: one JSON object per request
//! line, one JSON object per response line.

use std::io::{BufRead, BufReader, BufWriter, Write};

use anyhow::Context;
use serde_json::{json, Value};
use timblserver_protocol::{json_error, JsonRequest};
use tracing::{debug, info};

use crate::daemon::{
    server::{auto_bind, BaseMap, ConnArgs, ProtocolHandler},
    session::Session,
};

pub struct JsonHandler;

impl ProtocolHandler for JsonHandler {
    fn name(&self) -> &'static str {
        "json"
    }

    fn on_connection(&self, bases: &BaseMap, args: ConnArgs) -> anyhow::Result<()> {
        let ConnArgs { stream, id, .. } = args;
        let reader = BufReader::new(stream.try_clone().context("cloning stream")?);
        let mut writer = BufWriter::new(stream);

        let mut greeting = serde_json::Map::new();
        greeting.insert(String::from("status"), json!("ok"));
        let mut session = match auto_bind(bases) {
            Some(default) => Some(Session::new(default, id)),
            None => {
                let names: Vec<&String> = bases.keys().collect();
                greeting.insert(String::from("available_bases"), json!(names));
                None
            }
        };
        send(&mut writer, &Value::Object(greeting))?;

        let mut processed = 0;
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            // a request that does not parse is logged and dropped
            let request: JsonRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(err) => {
                    info!("json parsing failed on '{}': {}", line, err);
                    continue;
                }
            };
            debug!("handling JSON: {}", line);

            let command = match request.command.as_deref() {
                Some(command) if !command.is_empty() => command,
                _ => {
                    send(&mut writer, &json_error(format!("Illegal instruction:'{line}'")))?;
                    continue;
                }
            };

            match command {
                "base" => match request.param.as_deref() {
                    None => {
                        send(&mut writer, &json_error("missing 'param' for base command"))?;
                    }
                    Some(param) => match bases.get(param) {
                        Some(base) => {
                            session = Some(Session::new(base, id));
                            info!("session {} on socket, started", id);
                            send(&mut writer, &json!({ "base": param }))?;
                        }
                        None => {
                            send(
                                &mut writer,
                                &json_error(format!("Unknown basename: '{param}'")),
                            )?;
                        }
                    },
                },
                "set" => match (session.as_mut(), request.param.as_deref()) {
                    (None, _) => {
                        send(
                            &mut writer,
                            &json_error("'set' failed: you haven't selected a base yet!"),
                        )?;
                    }
                    (Some(_), None) => {
                        send(&mut writer, &json_error("missing 'param' for set command"))?;
                    }
                    (Some(session), Some(param)) => {
                        if session.set_options(param) {
                            debug!("setOptions: {}", param);
                            send(&mut writer, &json!({ "status": "ok" }))?;
                        } else {
                            send(&mut writer, &json_error(format!("set({param}) failed")))?;
                        }
                    }
                },
                "query" | "show" => match (session.as_ref(), request.param.as_deref()) {
                    (None, _) => {
                        send(&mut writer, &json_error("'show' failed: no base selected"))?;
                    }
                    (Some(_), None) => {
                        send(
                            &mut writer,
                            &json_error(format!("missing 'param' for {command} command")),
                        )?;
                    }
                    (Some(session), Some("settings")) => {
                        send(&mut writer, &session.exp.settings_to_json())?;
                    }
                    (Some(session), Some("weights")) => {
                        send(&mut writer, &session.exp.weights_to_json())?;
                    }
                    (Some(_), Some(param)) => {
                        send(
                            &mut writer,
                            &json_error(format!("'show' failed, unknown parameter: '{param}'")),
                        )?;
                    }
                },
                "exit" => {
                    send(&mut writer, &json!({ "status": "closed" }))?;
                    break;
                }
                "classify" => match session.as_mut() {
                    None => {
                        send(
                            &mut writer,
                            &json_error("'classify' failed: you haven't selected a base yet!"),
                        )?;
                    }
                    Some(session) => match (request.param, request.params) {
                        (Some(_), Some(_)) => {
                            send(&mut writer, &json_error("both 'param' and 'params' found"))?;
                        }
                        (None, None) => {
                            send(
                                &mut writer,
                                &json_error("missing 'param' or 'params' for 'classify'"),
                            )?;
                        }
                        (param, params) => {
                            let inputs = match param {
                                Some(param) => vec![param],
                                None => params.unwrap_or_default(),
                            };
                            let result = session.exp.classify_batch_to_json(&inputs);
                            processed += count_successes(&result);
                            send(&mut writer, &result)?;
                        }
                    },
                },
                other => {
                    send(&mut writer, &json_error(format!("Unknown command: '{other}'")))?;
                }
            }
        }

        info!("session {} terminated, {} instances processed", id, processed);
        Ok(())
    }
}

fn send<W: Write>(writer: &mut W, value: &Value) -> anyhow::Result<()> {
    debug!("send JSON: {}", value);
    writeln!(writer, "{value}")?;
    writer.flush()?;
    Ok(())
}

fn count_successes(result: &Value) -> usize {
    match result {
        Value::Array(items) => items.iter().filter(|item| item.get("error").is_none()).count(),
        Value::Object(map) if !map.contains_key("error") => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn success_counting() {
        assert_eq!(count_successes(&json!({ "category": "X" })), 1);
        assert_eq!(count_successes(&json!({ "error": "timbl:classify(a) failed" })), 0);
        assert_eq!(
            count_successes(&json!([
                { "category": "X" },
                { "error": "timbl:classify(a) failed" },
                { "category": "Y" },
            ])),
            2
        );
    }
}
