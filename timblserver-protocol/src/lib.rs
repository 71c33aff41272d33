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

use anyhow::anyhow;
use serde_derive::Deserialize;
use serde_json::{json, Value};

/// The greeting line every text-protocol session starts with.
///
/// Clients use it to recognize that they are actually talking to a
/// classification server before they start issuing commands.
pub const GREETING: &str = "Welcome to the Timbl server.";

/// Prefix of the optional second greeting line that enumerates the
/// bases a multi-base server is holding. A single-base server whose
/// base is named `default` never sends this line.
pub const AVAILABLE_BASES_PREFIX: &str = "available bases:";

/// The reply vocabulary of the text protocol.
///
/// Every server reply line starts with one of these tokens (or is a
/// continuation line inside a `Neighbors`/`Status` block). The client
/// keys on the code to know whether more lines follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    /// `CATEGORY {...}`, the head of a classification result.
    Category,
    /// `ERROR { ... }`.
    Error,
    /// `OK`, also used as `OK Closing` on exit.
    Ok,
    /// An echo line: `available bases: ...` or `selected base: ...`.
    Echo,
    /// `SKIP '<line>'`, the reply to a comment line.
    Skip,
    /// Start of a multi-line neighbors block.
    Neighbors,
    /// Terminator of a neighbors block.
    EndNeighbors,
    /// Start of a settings dump.
    Status,
    /// Terminator of a settings dump.
    EndStatus,
    Unknown,
}

impl ReplyCode {
    fn of(token: &str) -> ReplyCode {
        match token.to_ascii_uppercase().as_str() {
            "CATEGORY" => ReplyCode::Category,
            "ERROR" => ReplyCode::Error,
            "OK" => ReplyCode::Ok,
            "AVAILABLE" | "SELECTED" => ReplyCode::Echo,
            "SKIP" => ReplyCode::Skip,
            "NEIGHBORS" => ReplyCode::Neighbors,
            "ENDNEIGHBORS" => ReplyCode::EndNeighbors,
            "STATUS" => ReplyCode::Status,
            "ENDSTATUS" => ReplyCode::EndStatus,
            _ => ReplyCode::Unknown,
        }
    }
}

/// Split a reply line into its code and the remainder after the
/// code token.
pub fn extract_code(line: &str) -> (ReplyCode, &str) {
    let line = line.trim_start();
    match line.split_once(char::is_whitespace) {
        Some((token, rest)) => (ReplyCode::of(token), rest.trim_start()),
        None => (ReplyCode::of(line), ""),
    }
}

/// A parsed `CATEGORY ...` reply line.
///
/// `distribution` keeps its surrounding braces, matching what the
/// server put on the wire; `distance` does not. When `has_neighbors`
/// is set the line announced a `NEIGHBORS` block and the caller must
/// keep reading lines until `ENDNEIGHBORS`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifyReply {
    pub category: String,
    pub distribution: Option<String>,
    pub distance: Option<String>,
    pub has_neighbors: bool,
}

impl ClassifyReply {
    /// Parse the remainder of a reply line after the `CATEGORY` token.
    pub fn parse(rest: &str) -> anyhow::Result<ClassifyReply> {
        let category = brace_group(rest, 0)
            .ok_or_else(|| anyhow!("no category group in '{}'", rest))?;
        let mut reply = ClassifyReply {
            category: category.to_string(),
            ..ClassifyReply::default()
        };
        if let Some(pos) = rest.find("DISTRIBUTION") {
            let group = brace_group(rest, pos)
                .ok_or_else(|| anyhow!("unterminated distribution in '{}'", rest))?;
            reply.distribution = Some(format!("{{{group}}}"));
        }
        if let Some(pos) = rest.find("DISTANCE") {
            let group = brace_group(rest, pos)
                .ok_or_else(|| anyhow!("unterminated distance in '{}'", rest))?;
            reply.distance = Some(group.to_string());
        }
        reply.has_neighbors = rest.contains("NEIGHBORS");
        Ok(reply)
    }
}

// The text between the first '{' at or after `from` and the '}'
// that follows it.
fn brace_group(s: &str, from: usize) -> Option<&str> {
    let open = s[from..].find('{')? + from;
    let close = s[open..].find('}')? + open;
    Some(&s[open + 1..close])
}

/// One request on the line-delimited JSON protocol.
///
/// Each request is a single JSON object on one line. `param` and
/// `params` are mutually exclusive for `classify`; the server enforces
/// that, not the deserializer.
#[derive(Deserialize, Debug, Default)]
pub struct JsonRequest {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub params: Option<Vec<String>>,
}

/// The error shape used for all command-level failures on the JSON
/// protocol.
pub fn json_error<S: AsRef<str>>(message: S) -> Value {
    json!({ "status": "error", "message": message.as_ref() })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reply_codes() {
        let cases = vec![
            ("OK Closing", ReplyCode::Ok, "Closing"),
            ("CATEGORY {X}", ReplyCode::Category, "{X}"),
            ("available bases: b1 b2 ", ReplyCode::Echo, "bases: b1 b2 "),
            ("selected base: 'b1'", ReplyCode::Echo, "base: 'b1'"),
            ("SKIP '# note'", ReplyCode::Skip, "'# note'"),
            ("ENDNEIGHBORS", ReplyCode::EndNeighbors, ""),
            ("STATUS", ReplyCode::Status, ""),
            ("whatever else", ReplyCode::Unknown, "else"),
        ];
        for (line, code, rest) in cases {
            assert_eq!(extract_code(line), (code, rest), "line: {line}");
        }
    }

    #[test]
    fn classify_reply_minimal() {
        let reply = ClassifyReply::parse("{X}").expect("parse");
        assert_eq!(reply.category, "X");
        assert_eq!(reply.distribution, None);
        assert_eq!(reply.distance, None);
        assert!(!reply.has_neighbors);
    }

    #[test]
    fn classify_reply_full() {
        let reply = ClassifyReply::parse(
            "{X} DISTRIBUTION { X 2.0, Y 1.0 } DISTANCE {0.5} NEIGHBORS",
        )
        .expect("parse");
        assert_eq!(reply.category, "X");
        assert_eq!(reply.distribution.as_deref(), Some("{ X 2.0, Y 1.0 }"));
        assert_eq!(reply.distance.as_deref(), Some("0.5"));
        assert!(reply.has_neighbors);
    }

    #[test]
    fn classify_reply_no_group() {
        assert!(ClassifyReply::parse("no braces here").is_err());
    }

    #[test]
    fn json_request_shapes() {
        let req: JsonRequest =
            serde_json::from_str(r#"{"command":"classify","param":"a,b,c"}"#).expect("parse");
        assert_eq!(req.command.as_deref(), Some("classify"));
        assert_eq!(req.param.as_deref(), Some("a,b,c"));
        assert!(req.params.is_none());

        let req: JsonRequest =
            serde_json::from_str(r#"{"command":"classify","params":["a","b"]}"#).expect("parse");
        assert_eq!(req.params, Some(vec![String::from("a"), String::from("b")]));

        let err = json_error("Unknown command: 'frob'");
        assert_eq!(err["status"], "error");
        assert_eq!(err["message"], "Unknown command: 'frob'");
    }
}
