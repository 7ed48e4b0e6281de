use std::sync::Arc;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::config::{Catalog, RunnerConfig, RunnerSpec};
use crate::database as db;
use crate::grader;
use crate::queue::SubmitQueue;
use crate::routes::{SubmitMessage, SubmitRequest, Submission};
use crate::sandbox::{ProcessRunner, RunLimits};

pub async fn worker(
    id: u8,
    catalog: Arc<Catalog>,
    runners: Arc<RunnerConfig>,
    limits: RunLimits,
    db_pool: Arc<SqlitePool>,
    queue: Arc<SubmitQueue>,
    user_locks: Arc<db::UserLocks>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let runner = ProcessRunner::build(id)?;
    log::info!("Worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            message = queue.pop() => {
                let SubmitMessage { request, responder } = message;
                log::info!(
                    "Worker {id} grading submission by user {} for problem {}",
                    request.user_id,
                    request.problem_name
                );

                let history = process_submission(
                    &runner,
                    &catalog,
                    &runners,
                    &limits,
                    &db_pool,
                    &user_locks,
                    &request,
                )
                .await;

                if responder.send(history).is_err() {
                    log::warn!(
                        "Result for user {} on {} dropped: caller went away",
                        request.user_id,
                        request.problem_name
                    );
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}

/// Takes a submission from intake to recorded verdict.
///
/// Every path out of here returns well-formed submission records. Requests
/// naming an unknown problem or user get a single failure record that is
/// never persisted; once grading has run, the result is recorded under the
/// user's lock and the refreshed history is returned.
async fn process_submission(
    runner: &ProcessRunner,
    catalog: &Catalog,
    runners: &RunnerConfig,
    limits: &RunLimits,
    db_pool: &SqlitePool,
    user_locks: &db::UserLocks,
    request: &SubmitRequest,
) -> Vec<Submission> {
    let Some(spec) = resolve_runner(runners, request) else {
        let label = request.language.as_deref().unwrap_or("unknown");
        return vec![grader::failure_submission(
            &request.problem_name,
            label,
            &request.code,
            &format!("unsupported language: {label}"),
        )];
    };

    let Some(problem) = catalog.iter().find(|p| p.name == request.problem_name) else {
        return vec![grader::failure_submission(
            &request.problem_name,
            &spec.name,
            &request.code,
            "problem not found",
        )];
    };

    match db::find_user(request.user_id, db_pool).await {
        Ok(true) => {}
        Ok(false) => {
            return vec![grader::failure_submission(
                &problem.name,
                &spec.name,
                &request.code,
                "user not found",
            )];
        }
        Err(e) => {
            log::error!("Failed to check user {}: {e}", request.user_id);
            return vec![grader::failure_submission(
                &problem.name,
                &spec.name,
                &request.code,
                &format!("user lookup failed: {e}"),
            )];
        }
    }

    let outcome = grader::grade(runner, spec, problem, &request.code, limits).await;
    log::info!(
        "Judged user {} on {}: {}",
        request.user_id,
        problem.name,
        outcome.verdict
    );
    let submission = grader::build_submission(&problem.name, &spec.name, &request.code, outcome);

    // The record-then-read sequence runs under the user's lock so concurrent
    // submissions by one user serialize cleanly.
    let lock = user_locks.for_user(request.user_id);
    let _guard = lock.lock().await;

    if let Err(e) = db::record_submission(request.user_id, &submission, db_pool).await {
        log::error!(
            "Failed to record submission for user {}: {e}",
            request.user_id
        );
        return vec![grader::failure_submission(
            &problem.name,
            &spec.name,
            &request.code,
            &format!("failed to record submission: {e}"),
        )];
    }

    match db::history_for(request.user_id, &problem.name, db_pool).await {
        Ok(history) => history,
        Err(e) => {
            // The verdict is recorded; degrade to returning just this attempt
            log::error!(
                "Failed to read history for user {}: {e}",
                request.user_id
            );
            vec![submission]
        }
    }
}

/// Picks the runner for the declared language, or the first configured
/// runner when the request leaves it out.
fn resolve_runner<'a>(runners: &'a RunnerConfig, request: &SubmitRequest) -> Option<&'a RunnerSpec> {
    match &request.language {
        Some(label) => runners
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(label)),
        None => runners.first(),
    }
}
