use serde_json::Value;

use crate::config::{Problem, RunnerSpec};
use crate::routes::Submission;
use crate::sandbox::{ProcessRunner, RunLimits};
use crate::verdict::{self, CaseOutcome, Verdict};

/// The diagnostic triple attached to a rejected submission.
#[derive(Debug)]
pub struct FailingCase {
    pub input: Value,
    pub expected: Value,
    pub actual: Value,
}

/// Everything grading determined about one submission.
#[derive(Debug)]
pub struct GradeOutcome {
    pub verdict: Verdict,
    pub error: Option<String>,
    pub runtime_us: u32,
    pub memory_kb: u32,
    pub failure: Option<FailingCase>,
}

impl GradeOutcome {
    fn rejected(verdict: Verdict, error: String, runtime_us: u32, memory_kb: u32) -> Self {
        GradeOutcome {
            verdict,
            error: Some(error),
            runtime_us,
            memory_kb,
            failure: None,
        }
    }
}

/// Runs a submission against a problem's test cases, strictly in declared
/// order, stopping at the first failure.
///
/// Each case is one sandboxed process; nothing with a higher index than the
/// first failing case is ever executed. A sandbox fault is downgraded to a
/// Runtime Error outcome so the caller always gets a verdict.
pub async fn grade(
    runner: &ProcessRunner,
    spec: &RunnerSpec,
    problem: &Problem,
    code: &str,
    limits: &RunLimits,
) -> GradeOutcome {
    let mut runtime_us = 0u32;
    let mut memory_kb = 0u32;

    for (index, test) in problem.tests.iter().enumerate() {
        let artifact = match runner
            .run_case(spec, &problem.function_name, code, &test.input, limits)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                log::error!("Sandbox fault on {} case {index}: {e:#}", problem.name);
                return GradeOutcome::rejected(
                    Verdict::RuntimeError,
                    format!("judge failed to execute the submission: {e}"),
                    runtime_us,
                    memory_kb,
                );
            }
        };

        match verdict::parse_artifact(&artifact) {
            CaseOutcome::Returned {
                value,
                runtime_us: case_runtime,
                memory_kb: case_memory,
            } => {
                runtime_us = runtime_us.max(case_runtime);
                memory_kb = memory_kb.max(case_memory);
                if !verdict::values_match(&value, &test.expected) {
                    return GradeOutcome {
                        verdict: Verdict::WrongAnswer,
                        error: None,
                        runtime_us,
                        memory_kb,
                        failure: Some(FailingCase {
                            input: test.input.clone(),
                            expected: test.expected.clone(),
                            actual: value,
                        }),
                    };
                }
            }
            CaseOutcome::Raised(message) => {
                return GradeOutcome::rejected(
                    Verdict::RuntimeError,
                    message,
                    runtime_us,
                    memory_kb,
                );
            }
            CaseOutcome::CompileFailed(message) => {
                return GradeOutcome::rejected(
                    Verdict::CompileError,
                    message,
                    runtime_us,
                    memory_kb,
                );
            }
            CaseOutcome::TimedOut => {
                return GradeOutcome::rejected(
                    Verdict::TimeLimitExceeded,
                    format!("no result within {}ms", limits.wall_time.as_millis()),
                    artifact.wall_time_us,
                    memory_kb,
                );
            }
            CaseOutcome::Faulted(message) => {
                return GradeOutcome::rejected(
                    Verdict::RuntimeError,
                    message,
                    runtime_us,
                    memory_kb,
                );
            }
        }
    }

    GradeOutcome {
        verdict: Verdict::Accepted,
        error: None,
        runtime_us,
        memory_kb,
        failure: None,
    }
}

/// Assembles the API-facing submission record from a grading outcome.
pub fn build_submission(
    problem_name: &str,
    language: &str,
    code: &str,
    outcome: GradeOutcome,
) -> Submission {
    let GradeOutcome {
        verdict,
        error,
        runtime_us,
        memory_kb,
        failure,
    } = outcome;

    let (input, expected_output, user_output) = match failure {
        Some(case) => (Some(case.input), Some(case.expected), Some(case.actual)),
        None => (None, None, None),
    };

    Submission {
        problem_name: problem_name.to_string(),
        status: verdict,
        error,
        time: crate::create_timestamp(),
        runtime: runtime_us,
        language: language.to_string(),
        memory: memory_kb,
        code_body: code.to_string(),
        input,
        expected_output,
        user_output,
    }
}

/// A well-formed failure record for a submission that never reached the
/// sandbox, such as an unknown problem or user.
pub fn failure_submission(
    problem_name: &str,
    language: &str,
    code: &str,
    message: &str,
) -> Submission {
    Submission {
        problem_name: problem_name.to_string(),
        status: Verdict::RuntimeError,
        error: Some(message.to_string()),
        time: crate::create_timestamp(),
        runtime: 0,
        language: language.to_string(),
        memory: 0,
        code_body: code.to_string(),
        input: None,
        expected_output: None,
        user_output: None,
    }
}
