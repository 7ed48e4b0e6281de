use serde_json::{Value, json};

use crate::config::DriverKind;

/// Name of the staged file holding the per-case payload.
pub const CASE_FILE: &str = "case.json";

impl DriverKind {
    /// File the candidate's code is written to inside the case directory.
    pub fn source_name(&self) -> &'static str {
        match self {
            DriverKind::Python => "solution.py",
            DriverKind::Node => "solution.js",
        }
    }

    /// File the driver template is written to inside the case directory.
    pub fn driver_name(&self) -> &'static str {
        match self {
            DriverKind::Python => "driver.py",
            DriverKind::Node => "driver.js",
        }
    }

    /// The fixed harness source for this driver kind.
    ///
    /// Templates are compile-time constants and are staged byte-for-byte;
    /// everything case-specific reaches the driver through `case.json`, so
    /// neither candidate code nor test data is ever spliced into executable
    /// text.
    pub fn template(&self) -> &'static str {
        match self {
            DriverKind::Python => PYTHON_DRIVER,
            DriverKind::Node => NODE_DRIVER,
        }
    }
}

/// Builds the per-case payload handed to the driver as plain data.
pub fn case_payload(function: &str, args: &Value) -> Value {
    json!({
        "function": function,
        "args": args,
    })
}

/// Harness for Python submissions
///
/// Imports the candidate module, resolves the entry point by name, calls it
/// with the arguments from `case.json` and prints a single JSON record on the
/// last line of stdout. Anything the candidate prints is swallowed so it can
/// never masquerade as the result record.
const PYTHON_DRIVER: &str = r#"import importlib
import io
import json
import resource
import sys
import time
import traceback


def emit(record):
    sys.stdout.write(json.dumps(record) + "\n")
    sys.stdout.flush()


def main():
    with open("case.json", "r", encoding="utf-8") as fh:
        case = json.load(fh)

    captured = io.StringIO()
    real_stdout = sys.stdout
    sys.stdout = captured
    try:
        module = importlib.import_module("solution")
    except BaseException:
        detail = traceback.format_exc(limit=4)
        sys.stdout = real_stdout
        emit({"outcome": "compile_error", "error": detail})
        return
    sys.stdout = real_stdout

    func = getattr(module, case["function"], None)
    if not callable(func):
        emit({
            "outcome": "missing_function",
            "error": "function " + repr(case["function"]) + " is not defined",
        })
        return

    args = case["args"]
    if not isinstance(args, list):
        args = [args]

    sys.stdout = captured
    started = time.perf_counter()
    try:
        value = func(*args)
    except BaseException:
        detail = traceback.format_exc(limit=4)
        sys.stdout = real_stdout
        emit({"outcome": "error", "error": detail})
        return
    elapsed = time.perf_counter() - started
    sys.stdout = real_stdout

    try:
        payload = json.loads(json.dumps(value))
    except (TypeError, ValueError):
        emit({
            "outcome": "error",
            "error": "return value of type " + type(value).__name__
            + " is not JSON-serializable",
        })
        return

    emit({
        "outcome": "value",
        "value": payload,
        "runtime_us": int(elapsed * 1000000),
        "memory_kb": int(resource.getrusage(resource.RUSAGE_SELF).ru_maxrss),
    })


main()
"#;

/// Harness for JavaScript submissions
///
/// Evaluates the candidate source as a script, then resolves the entry point
/// from `globalThis` or, for `const`/`let` declarations, from the context's
/// lexical bindings. Console output from the candidate is silenced while its
/// code runs.
const NODE_DRIVER: &str = r#""use strict";

const fs = require("fs");
const vm = require("vm");
const { performance } = require("perf_hooks");

function emit(record) {
  process.stdout.write(JSON.stringify(record) + "\n");
}

function silence() {
  const saved = {
    log: console.log,
    info: console.info,
    warn: console.warn,
    error: console.error,
  };
  const noop = function () {};
  console.log = noop;
  console.info = noop;
  console.warn = noop;
  console.error = noop;
  return function () {
    console.log = saved.log;
    console.info = saved.info;
    console.warn = saved.warn;
    console.error = saved.error;
  };
}

function main() {
  const caseData = JSON.parse(fs.readFileSync("case.json", "utf8"));
  const source = fs.readFileSync("solution.js", "utf8");

  let restore = silence();
  try {
    vm.runInThisContext(source, { filename: "solution.js" });
  } catch (err) {
    restore();
    emit({ outcome: "compile_error", error: String((err && err.stack) || err) });
    return;
  }
  restore();

  let entry = globalThis[caseData.function];
  if (typeof entry !== "function" && /^[A-Za-z_$][A-Za-z0-9_$]*$/.test(caseData.function)) {
    // const/let declarations are lexical bindings, not globalThis
    // properties, but later scripts in the same context can still see them
    try {
      entry = vm.runInThisContext(caseData.function);
    } catch (err) {
      entry = undefined;
    }
  }
  if (typeof entry !== "function") {
    emit({
      outcome: "missing_function",
      error: "function " + caseData.function + " is not defined",
    });
    return;
  }

  const args = Array.isArray(caseData.args) ? caseData.args : [caseData.args];

  restore = silence();
  let value;
  const started = performance.now();
  try {
    value = entry.apply(null, args);
  } catch (err) {
    restore();
    emit({ outcome: "error", error: String((err && err.stack) || err) });
    return;
  }
  const elapsed = performance.now() - started;
  restore();

  let payload = null;
  try {
    const text = JSON.stringify(value === undefined ? null : value);
    payload = text === undefined ? null : JSON.parse(text);
  } catch (err) {
    emit({ outcome: "error", error: "return value is not JSON-serializable" });
    return;
  }

  emit({
    outcome: "value",
    value: payload,
    runtime_us: Math.round(elapsed * 1000),
    memory_kb: Math.round(process.memoryUsage().rss / 1024),
  });
}

main();
"#;
