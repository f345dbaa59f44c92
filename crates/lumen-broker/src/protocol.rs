//! Wire protocol: newline-delimited JSON, grounded in
//! `components/network.py::NetworkThread`'s command dispatch.
//!
//! Client -> server: `{id?, command, params?}`. Server -> client: either
//! `{id?, result}`, `{id?, error: {code, message, data?}}`, or an
//! unsolicited `{command, params}` broadcast. Parsing and subscription-set
//! mutation are kept as plain functions so they're testable without a real
//! socket.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ERR_INVALID_UTF8: i32 = 1;
pub const ERR_INVALID_JSON: i32 = 2;
pub const ERR_UNKNOWN_COMMAND: i32 = 3;

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(default)]
    id: Option<Value>,
    command: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ResultResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    result: Value,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// An unsolicited `{command, params}` line, e.g. the per-frame `audio`
/// publish.
#[derive(Debug, Serialize)]
pub struct Broadcast {
    pub command: &'static str,
    pub params: Value,
}

pub fn broadcast_line(command: &'static str, params: Value) -> String {
    let mut line = serde_json::to_string(&Broadcast { command, params }).expect("broadcast serializes");
    line.push('\n');
    line
}

fn error_line(id: Option<Value>, code: i32, message: impl Into<String>) -> String {
    let resp = ErrorResponse {
        id,
        error: ErrorBody {
            code,
            message: message.into(),
            data: None,
        },
    };
    let mut line = serde_json::to_string(&resp).expect("error response serializes");
    line.push('\n');
    line
}

fn result_line(id: Option<Value>, result: Value) -> String {
    let resp = ResultResponse { id, result };
    let mut line = serde_json::to_string(&resp).expect("result response serializes");
    line.push('\n');
    line
}

/// Apply a `subscribe` command's `events` list to a client's subscription
/// set: bare names replace the set (the first bare name in the list clears
/// it), `+name` adds, `-name` removes.
pub fn apply_subscription(current: &mut BTreeSet<String>, items: &[String]) {
    let mut cleared = false;
    for item in items {
        if let Some(name) = item.strip_prefix('+') {
            current.insert(name.to_string());
        } else if let Some(name) = item.strip_prefix('-') {
            current.remove(name);
        } else {
            if !cleared {
                current.clear();
                cleared = true;
            }
            current.insert(item.clone());
        }
    }
}

fn handle_subscribe(id: Option<Value>, params: Option<Value>, subs: &mut BTreeSet<String>) -> String {
    let items: Vec<String> = params
        .as_ref()
        .and_then(|p| p.get("events"))
        .and_then(|e| e.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    apply_subscription(subs, &items);
    let result: Vec<Value> = subs.iter().cloned().map(Value::from).collect();
    result_line(id, Value::Array(result))
}

/// Parse and dispatch one received line, returning the exact bytes (with
/// trailing newline) to write back to the client. `raw` is the line without
/// its terminator.
pub fn process_line(raw: &[u8], subs: &mut BTreeSet<String>) -> String {
    let text = match std::str::from_utf8(raw) {
        Ok(t) => t,
        Err(_) => return error_line(None, ERR_INVALID_UTF8, "line is not valid UTF-8"),
    };
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(err) => return error_line(None, ERR_INVALID_JSON, format!("invalid JSON: {err}")),
    };
    match msg.command.as_str() {
        "subscribe" => handle_subscribe(msg.id, msg.params, subs),
        other => error_line(msg.id, ERR_UNKNOWN_COMMAND, format!("unknown command: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_replace_the_set() {
        let mut subs: BTreeSet<String> = ["audio".to_string(), "stale".to_string()].into_iter().collect();
        apply_subscription(&mut subs, &["audio".to_string()]);
        assert_eq!(subs, ["audio".to_string()].into_iter().collect());
    }

    #[test]
    fn plus_and_minus_modify_in_place() {
        let mut subs: BTreeSet<String> = ["audio".to_string()].into_iter().collect();
        apply_subscription(&mut subs, &["+beats".to_string(), "-audio".to_string()]);
        assert_eq!(subs, ["beats".to_string()].into_iter().collect());
    }

    #[test]
    fn invalid_utf8_reports_error_code_one() {
        let mut subs = BTreeSet::new();
        let line = process_line(&[0xff, 0xfe], &mut subs);
        assert!(line.contains("\"code\":1"));
    }

    #[test]
    fn invalid_json_reports_error_code_two() {
        let mut subs = BTreeSet::new();
        let line = process_line(b"not json", &mut subs);
        assert!(line.contains("\"code\":2"));
    }

    #[test]
    fn unknown_command_reports_error_code_three() {
        let mut subs = BTreeSet::new();
        let line = process_line(br#"{"id":1,"command":"frobnicate"}"#, &mut subs);
        assert!(line.contains("\"code\":3"));
        assert!(line.contains("\"id\":1"));
    }

    #[test]
    fn subscribe_returns_the_current_set() {
        let mut subs = BTreeSet::new();
        let line = process_line(br#"{"id":"a","command":"subscribe","params":{"events":["audio"]}}"#, &mut subs);
        assert!(line.contains("\"result\":[\"audio\"]"));
        assert!(subs.contains("audio"));
    }
}
