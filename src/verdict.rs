use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sandbox::RunArtifact;

/// Tolerance applied to numeric comparisons, both absolute and relative.
pub const FLOAT_TOLERANCE: f64 = 1e-6;

/// Final classification of a submission
///
/// Serialized with the human-readable labels the API and the database use.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Compile Error")]
    CompileError,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted => "Accepted",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::CompileError => "Compile Error",
        }
    }

    pub fn from_label(label: &str) -> Option<Verdict> {
        match label {
            "Accepted" => Some(Verdict::Accepted),
            "Wrong Answer" => Some(Verdict::WrongAnswer),
            "Runtime Error" => Some(Verdict::RuntimeError),
            "Time Limit Exceeded" => Some(Verdict::TimeLimitExceeded),
            "Compile Error" => Some(Verdict::CompileError),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one sandboxed run amounted to, after decoding the driver's record
#[derive(Debug, PartialEq)]
pub enum CaseOutcome {
    /// The entry point returned a value; runtime and memory are self-reported
    /// by the driver
    Returned {
        value: Value,
        runtime_us: u32,
        memory_kb: u32,
    },
    /// The candidate's code raised during the call
    Raised(String),
    /// The candidate's code failed to load or lacks the entry point
    CompileFailed(String),
    /// The run was cut off at the wall-clock budget
    TimedOut,
    /// The run went off contract: crashed, was killed, or printed no record
    Faulted(String),
}

/// One line of driver stdout, as emitted by every harness template.
#[derive(Deserialize)]
struct DriverRecord {
    outcome: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: String,
    #[serde(default)]
    runtime_us: u64,
    #[serde(default)]
    memory_kb: u64,
}

/// Decodes a raw run artifact into a case outcome.
///
/// Only the last parseable stdout line counts as the driver's record, so
/// candidate prints that slip past the driver's capture can never spoof a
/// result. A run that timed out is classified before its output is trusted.
pub fn parse_artifact(artifact: &RunArtifact) -> CaseOutcome {
    if artifact.timed_out {
        return CaseOutcome::TimedOut;
    }

    if let Some(record) = last_record(&artifact.stdout) {
        return match record.outcome.as_str() {
            "value" => CaseOutcome::Returned {
                value: record.value,
                runtime_us: record.runtime_us.min(u64::from(u32::MAX)) as u32,
                memory_kb: record.memory_kb.min(u64::from(u32::MAX)) as u32,
            },
            "error" => CaseOutcome::Raised(record.error),
            "compile_error" | "missing_function" => CaseOutcome::CompileFailed(record.error),
            other => CaseOutcome::Faulted(format!("runner reported unknown outcome {other:?}")),
        };
    }

    CaseOutcome::Faulted(describe_failure(artifact))
}

fn last_record(stdout: &str) -> Option<DriverRecord> {
    stdout
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str(line.trim()).ok())
}

/// Builds a diagnostic for a run that produced no usable record.
fn describe_failure(artifact: &RunArtifact) -> String {
    let mut message = if let Some(code) = artifact.status.code() {
        if code == 0 {
            "runner produced no parseable result".to_string()
        } else {
            format!("runner exited with code {code}")
        }
    } else {
        killed_by_signal(artifact).unwrap_or_else(|| "runner terminated abnormally".to_string())
    };

    let stderr_tail = tail(&artifact.stderr, 400);
    if !stderr_tail.is_empty() {
        message.push_str(": ");
        message.push_str(&stderr_tail);
    } else if artifact.stdout_truncated {
        message.push_str(" (output truncated at the size limit)");
    }
    message
}

#[cfg(unix)]
fn killed_by_signal(artifact: &RunArtifact) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    artifact
        .status
        .signal()
        .map(|sig| format!("runner killed by signal {sig}"))
}

#[cfg(not(unix))]
fn killed_by_signal(_artifact: &RunArtifact) -> Option<String> {
    None
}

fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(max_chars.saturating_sub(1))
        .map_or(0, |(i, _)| i);
    trimmed[start..].to_string()
}

/// Structural equality between the candidate's value and the expected one.
///
/// Arrays must match element-wise in order, objects key-for-key, and numbers
/// within `FLOAT_TOLERANCE` (absolute or relative, whichever is looser).
/// Everything else must match exactly; no type coercion.
pub fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => {
            if a == b {
                return true;
            }
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => numbers_match(x, y),
                _ => false,
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_match(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_match(x, y)))
        }
        _ => actual == expected,
    }
}

fn numbers_match(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    let diff = (a - b).abs();
    diff <= FLOAT_TOLERANCE || diff <= FLOAT_TOLERANCE * a.abs().max(b.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_verdict_labels_round_trip() {
        for verdict in [
            Verdict::Accepted,
            Verdict::WrongAnswer,
            Verdict::RuntimeError,
            Verdict::TimeLimitExceeded,
            Verdict::CompileError,
        ] {
            assert_eq!(Verdict::from_label(verdict.as_str()), Some(verdict));
            assert_eq!(
                serde_json::to_value(verdict).unwrap(),
                json!(verdict.as_str())
            );
        }
        assert_eq!(Verdict::from_label("Partial"), None);
    }

    #[test]
    fn test_values_match_exact_types() {
        assert!(values_match(&json!([0, 1]), &json!([0, 1])));
        assert!(!values_match(&json!([1, 0]), &json!([0, 1])));
        assert!(!values_match(&json!([0, 1]), &json!([0, 1, 2])));
        assert!(values_match(&json!("olleh"), &json!("olleh")));
        assert!(!values_match(&json!("0"), &json!(0)));
        assert!(!values_match(&json!(null), &json!(0)));
        assert!(!values_match(&json!(true), &json!(1)));
    }

    #[test]
    fn test_values_match_number_tolerance() {
        assert!(values_match(&json!(3), &json!(3.0)));
        assert!(values_match(&json!(2.5000004), &json!(2.5)));
        assert!(!values_match(&json!(2.501), &json!(2.5)));
        // Relative tolerance for large magnitudes
        assert!(values_match(&json!(1e12 + 100.0), &json!(1e12)));
        assert!(!values_match(&json!(1e12 + 1e7), &json!(1e12)));
    }

    #[test]
    fn test_values_match_nested_structures() {
        assert!(values_match(
            &json!({"a": [1, {"b": 2.0000001}], "c": null}),
            &json!({"a": [1, {"b": 2}], "c": null}),
        ));
        assert!(!values_match(
            &json!({"a": 1, "b": 2}),
            &json!({"a": 1, "z": 2}),
        ));
        assert!(!values_match(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
    }

    #[cfg(unix)]
    fn artifact(stdout: &str, raw_status: i32) -> RunArtifact {
        use std::os::unix::process::ExitStatusExt;
        RunArtifact {
            status: std::process::ExitStatus::from_raw(raw_status),
            stdout: stdout.to_string(),
            stderr: String::new(),
            wall_time_us: 1200,
            timed_out: false,
            stdout_truncated: false,
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_artifact_takes_last_parseable_line() {
        let stdout = concat!(
            "debugging noise from the candidate\n",
            "{\"outcome\": \"value\", \"value\": [9], \"runtime_us\": 1, \"memory_kb\": 1}\n",
            "{\"outcome\": \"value\", \"value\": [0, 1], \"runtime_us\": 42, \"memory_kb\": 8400}\n",
            "trailing garbage\n",
        );
        let outcome = parse_artifact(&artifact(stdout, 0));
        assert_eq!(
            outcome,
            CaseOutcome::Returned {
                value: json!([0, 1]),
                runtime_us: 42,
                memory_kb: 8400,
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_artifact_error_outcomes() {
        let raised = parse_artifact(&artifact(
            "{\"outcome\": \"error\", \"error\": \"ValueError: boom\"}",
            0,
        ));
        assert_eq!(raised, CaseOutcome::Raised("ValueError: boom".to_string()));

        let compile = parse_artifact(&artifact(
            "{\"outcome\": \"compile_error\", \"error\": \"SyntaxError\"}",
            0,
        ));
        assert_eq!(compile, CaseOutcome::CompileFailed("SyntaxError".to_string()));

        let missing = parse_artifact(&artifact(
            "{\"outcome\": \"missing_function\", \"error\": \"not defined\"}",
            0,
        ));
        assert_eq!(missing, CaseOutcome::CompileFailed("not defined".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_artifact_timeout_wins_over_output() {
        let mut timed = artifact(
            "{\"outcome\": \"value\", \"value\": 1, \"runtime_us\": 1, \"memory_kb\": 1}",
            0,
        );
        timed.timed_out = true;
        assert_eq!(parse_artifact(&timed), CaseOutcome::TimedOut);
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_artifact_without_record_is_a_fault() {
        // Clean exit but no record
        match parse_artifact(&artifact("nothing structured here", 0)) {
            CaseOutcome::Faulted(msg) => assert!(msg.contains("no parseable result")),
            other => panic!("expected fault, got {other:?}"),
        }

        // Non-zero exit: raw wait status 0x100 is exit code 1
        let mut crashed = artifact("", 0x100);
        crashed.stderr = "Segmentation fault".to_string();
        match parse_artifact(&crashed) {
            CaseOutcome::Faulted(msg) => {
                assert!(msg.contains("exited with code 1"));
                assert!(msg.contains("Segmentation fault"));
            }
            other => panic!("expected fault, got {other:?}"),
        }

        // Raw wait status 9 is death by SIGKILL
        match parse_artifact(&artifact("", 9)) {
            CaseOutcome::Faulted(msg) => assert!(msg.contains("signal 9")),
            other => panic!("expected fault, got {other:?}"),
        }
    }
}
