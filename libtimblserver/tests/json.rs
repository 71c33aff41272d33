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

//! End-to-end tests for the line-delimited JSON protocol.

use libtimblserver::config::Protocol;
use ntest::timeout;
use serde_json::{json, Value};

mod support;

use support::{start, start_default, LineConn, ONE_FEATURE, THREE_FEATURES};

fn read_json(conn: &mut LineConn) -> Value {
    serde_json::from_str(&conn.read_line()).expect("parsing response json")
}

#[test]
#[timeout(30000)]
fn single_default_greeting_and_classify() {
    let server = start_default(Protocol::Json);
    let mut conn = LineConn::open(server.port);

    let greeting = read_json(&mut conn);
    assert_eq!(greeting["status"], "ok");
    assert!(greeting.get("available_bases").is_none());

    conn.send_line(r#"{"command":"classify","param":"a,b,c"}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply["category"], "X");
    assert_eq!(reply["distribution"], "{ X 1.0 }");
}

#[test]
#[timeout(30000)]
fn multi_base_greeting_and_base_selection() {
    let server = start(
        Protocol::Json,
        &[("three.data", THREE_FEATURES), ("one.data", ONE_FEATURE)],
        &[("b1", "-f three.data"), ("b2", "-f one.data")],
    );
    let mut conn = LineConn::open(server.port);

    let greeting = read_json(&mut conn);
    assert_eq!(greeting["status"], "ok");
    assert_eq!(greeting["available_bases"], json!(["b1", "b2"]));

    conn.send_line(r#"{"command":"classify","param":"foo"}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["message"], "'classify' failed: you haven't selected a base yet!");

    conn.send_line(r#"{"command":"base","param":"b2"}"#);
    assert_eq!(read_json(&mut conn), json!({ "base": "b2" }));

    conn.send_line(r#"{"command":"base","param":"nope"}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply["message"], "Unknown basename: 'nope'");

    conn.send_line(r#"{"command":"classify","param":"foo"}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply["category"], "Y");
}

#[test]
#[timeout(30000)]
fn batch_classify_preserves_order() {
    let server = start(
        Protocol::Json,
        &[("one.data", ONE_FEATURE)],
        &[("default", "-f one.data")],
    );
    let mut conn = LineConn::open(server.port);
    read_json(&mut conn);

    conn.send_line(r#"{"command":"classify","params":["foo","bar"]}"#);
    let reply = read_json(&mut conn);
    let items = reply.as_array().expect("array reply");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["category"], "Y");
    assert_eq!(items[1]["category"], "Z");
}

#[test]
#[timeout(30000)]
fn batch_failures_use_item_errors() {
    let server = start_default(Protocol::Json);
    let mut conn = LineConn::open(server.port);
    read_json(&mut conn);

    conn.send_line(r#"{"command":"classify","params":["a,b,c","broken"]}"#);
    let reply = read_json(&mut conn);
    let items = reply.as_array().expect("array reply");
    assert_eq!(items[0]["category"], "X");
    assert_eq!(items[1]["error"], "timbl:classify(broken) failed");
}

#[test]
#[timeout(30000)]
fn param_and_params_are_mutually_exclusive() {
    let server = start_default(Protocol::Json);
    let mut conn = LineConn::open(server.port);
    read_json(&mut conn);

    conn.send_line(r#"{"command":"classify","param":"a,b,c","params":["a,b,c"]}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["message"], "both 'param' and 'params' found");

    conn.send_line(r#"{"command":"classify"}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply["message"], "missing 'param' or 'params' for 'classify'");
}

#[test]
#[timeout(30000)]
fn set_show_and_unknown_commands() {
    let server = start_default(Protocol::Json);
    let mut conn = LineConn::open(server.port);
    read_json(&mut conn);

    conn.send_line(r#"{"command":"set","param":"+vdi"}"#);
    assert_eq!(read_json(&mut conn), json!({ "status": "ok" }));

    conn.send_line(r#"{"command":"set","param":"-q7"}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply["message"], "set(-q7) failed");

    conn.send_line(r#"{"command":"show","param":"settings"}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply["algorithm"], "IB1");
    assert_eq!(reply["verbosity"], "+db+di");

    conn.send_line(r#"{"command":"query","param":"weights"}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply.as_array().map(|a| a.len()), Some(3));

    conn.send_line(r#"{"command":"show","param":"sprockets"}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply["message"], "'show' failed, unknown parameter: 'sprockets'");

    conn.send_line(r#"{"command":"frob"}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply["message"], "Unknown command: 'frob'");
}

#[test]
#[timeout(30000)]
fn garbage_lines_are_dropped_not_answered() {
    let server = start_default(Protocol::Json);
    let mut conn = LineConn::open(server.port);
    read_json(&mut conn);

    // not json at all: logged and dropped, no response line
    conn.send_line("this is not json");
    conn.send_line(r#"{"command":"classify","param":"a,b,c"}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply["category"], "X");

    // json without a command gets the illegal-instruction error
    conn.send_line(r#"{"param":"a,b,c"}"#);
    let reply = read_json(&mut conn);
    assert_eq!(reply["status"], "error");
    assert!(
        reply["message"].as_str().expect("message").starts_with("Illegal instruction:"),
        "reply: {reply}"
    );
}

#[test]
#[timeout(30000)]
fn exit_closes_the_session() {
    let server = start_default(Protocol::Json);
    let mut conn = LineConn::open(server.port);
    read_json(&mut conn);

    conn.send_line(r#"{"command":"exit"}"#);
    assert_eq!(read_json(&mut conn), json!({ "status": "closed" }));
    assert_eq!(conn.read_line(), "");
}

#[test]
#[timeout(30000)]
fn responses_round_trip_through_serde() {
    let server = start_default(Protocol::Json);
    let mut conn = LineConn::open(server.port);
    read_json(&mut conn);

    conn.send_line(r#"{"command":"set","param":"+vdi+md+cf"}"#);
    read_json(&mut conn);
    conn.send_line(r#"{"command":"classify","param":"a,b,c"}"#);
    let line = conn.read_line();
    let reply: Value = serde_json::from_str(&line).expect("parsing response json");
    // no lossy serialization for known keys
    assert_eq!(serde_json::from_str::<Value>(&reply.to_string()).expect("reparse"), reply);
    assert_eq!(reply["distance"], json!(0.0));
    assert_eq!(reply["match_depth"], json!(3.0));
    assert_eq!(reply["confidence"], json!(1.0));
}
