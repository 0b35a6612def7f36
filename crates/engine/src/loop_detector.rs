// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `LoopDetector`: a pure policy over the last 8 tool calls of a worker
//! deciding whether the agent appears stuck (`spec.md` §4.4).

use wm_core::ToolCallEntry;

const WINDOW: usize = 8;
const IDENTICAL_RUN: usize = 5;

/// Canonical key used to compare tool calls for the "identical" rule.
#[derive(Debug, PartialEq, Eq)]
enum CallKey {
    Read { file_path: Option<String>, offset: Option<i64>, limit: Option<i64> },
    Other { name: String, input: serde_json::Value },
}

fn canonical_key(call: &ToolCallEntry) -> CallKey {
    if call.name == "Read" {
        let input = call.input.as_ref();
        return CallKey::Read {
            file_path: input.and_then(|v| v.get("file_path")).and_then(|v| v.as_str()).map(String::from),
            offset: input.and_then(|v| v.get("offset")).and_then(|v| v.as_i64()),
            limit: input.and_then(|v| v.get("limit")).and_then(|v| v.as_i64()),
        };
    }
    CallKey::Other { name: call.name.clone(), input: call.input.clone().unwrap_or(serde_json::Value::Null) }
}

/// Collapse quoted spans to empty strings and truncate to 50 chars, for the
/// "similar Bash" comparison (`spec.md` §4.4 rule B).
fn normalize_bash_command(input: Option<&serde_json::Value>) -> String {
    let command = input.and_then(|v| v.get("command")).and_then(|v| v.as_str()).unwrap_or("");
    let stripped = strip_quoted_spans(command);
    stripped.chars().take(50).collect()
}

fn strip_quoted_spans(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                out.push_str("\"\"");
                for next in chars.by_ref() {
                    if next == '"' {
                        break;
                    }
                }
            }
            '\'' => {
                out.push_str("''");
                for next in chars.by_ref() {
                    if next == '\'' {
                        break;
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Verdict from [`detect`].
pub enum LoopVerdict {
    Stuck { reason: String },
    Ok,
}

/// Inspect the most recent tool calls (oldest-first order expected) and
/// decide whether the agent looks stuck.
pub fn detect(recent_calls: &[ToolCallEntry]) -> LoopVerdict {
    let tail: Vec<&ToolCallEntry> = recent_calls.iter().rev().take(WINDOW).collect();

    if tail.len() >= IDENTICAL_RUN {
        let last_five = &tail[..IDENTICAL_RUN];
        let first_key = canonical_key(last_five[0]);
        if last_five.iter().all(|c| canonical_key(c) == first_key) {
            return LoopVerdict::Stuck {
                reason: format!("Agent stuck: made 5 identical {} calls", last_five[0].name),
            };
        }
    }

    if tail.len() == WINDOW && tail.iter().all(|c| c.name == "Bash") {
        let first = normalize_bash_command(tail[0].input.as_ref());
        if tail.iter().all(|c| normalize_bash_command(c.input.as_ref()) == first) {
            let pattern: String = first.chars().take(30).collect();
            return LoopVerdict::Stuck {
                reason: format!("Agent stuck: 8 similar Bash calls matching \"{pattern}\""),
            };
        }
    }

    LoopVerdict::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn call(name: &str, input: serde_json::Value) -> ToolCallEntry {
        ToolCallEntry { name: name.into(), timestamp: 0, input: Some(input) }
    }

    #[test]
    fn five_identical_reads_trigger() {
        let calls: Vec<_> =
            (0..5).map(|_| call("Read", serde_json::json!({"file_path": "/a", "offset": 0, "limit": 10}))).collect();
        assert!(matches!(detect(&calls), LoopVerdict::Stuck { .. }));
    }

    #[parameterized(
        different_offset = (0, 10, 5, 10),
        different_limit = (0, 10, 0, 20),
    )]
    fn differing_offset_or_limit_does_not_trigger(o1: i64, l1: i64, o2: i64, l2: i64) {
        let mut calls: Vec<_> =
            (0..4).map(|_| call("Read", serde_json::json!({"file_path": "/a", "offset": o1, "limit": l1}))).collect();
        calls.push(call("Read", serde_json::json!({"file_path": "/a", "offset": o2, "limit": l2})));
        assert!(matches!(detect(&calls), LoopVerdict::Ok));
    }

    #[test]
    fn eight_similar_bash_calls_trigger() {
        let calls: Vec<_> = (0..8)
            .map(|i| call("Bash", serde_json::json!({"command": format!("echo \"item-{i}\"")})))
            .collect();
        assert!(matches!(detect(&calls), LoopVerdict::Stuck { .. }));
    }

    #[test]
    fn seven_similar_bash_calls_do_not_trigger() {
        let calls: Vec<_> =
            (0..7).map(|i| call("Bash", serde_json::json!({"command": format!("echo \"item-{i}\"")}))).collect();
        assert!(matches!(detect(&calls), LoopVerdict::Ok));
    }

    #[test]
    fn mixed_tool_calls_never_trigger_rule_b() {
        let mut calls: Vec<_> = (0..7).map(|_| call("Bash", serde_json::json!({"command": "echo hi"}))).collect();
        calls.push(call("Read", serde_json::json!({"file_path": "/a"})));
        assert!(matches!(detect(&calls), LoopVerdict::Ok));
    }
}
