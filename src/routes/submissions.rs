use actix_web::{HttpResponse, Responder, get, post, web};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use tokio::sync::oneshot;

use super::{ErrorResponse, ErrorResponseWithMessage};
use crate::config::RunnerConfig;
use crate::database as db;
use crate::queue::SubmitQueue;
use crate::verdict::Verdict;

/// Body of POST /submissions.
#[derive(Serialize, Deserialize, Debug)]
pub struct SubmitRequest {
    pub user_id: u32,
    pub problem_name: String,
    pub code: String,
    /// Runner label; the first configured runner when absent
    #[serde(default)]
    pub language: Option<String>,
}

/// One graded attempt, as returned by the API and kept in history.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Submission {
    pub problem_name: String,
    pub status: Verdict,
    pub error: Option<String>,
    pub time: String,
    /// Driver-reported call runtime in microseconds
    pub runtime: u32,
    pub language: String,
    /// Driver-reported peak RSS in kilobytes
    pub memory: u32,
    pub code_body: String,
    pub input: Option<Value>,
    pub expected_output: Option<Value>,
    pub user_output: Option<Value>,
}

/// A submission in flight from the route to a worker, with the channel the
/// worker answers on.
pub struct SubmitMessage {
    pub request: SubmitRequest,
    pub responder: oneshot::Sender<Vec<Submission>>,
}

#[post("/submissions")]
pub async fn post_submission_handler(
    queue: web::Data<SubmitQueue>,
    runners: web::Data<RunnerConfig>,
    body: web::Json<SubmitRequest>,
) -> impl Responder {
    let request = body.into_inner();

    if request.code.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message: "code must not be empty".to_string(),
        });
    }

    if let Some(label) = &request.language
        && !runners
            .as_ref()
            .iter()
            .any(|r| r.name.eq_ignore_ascii_case(label))
    {
        return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message: format!("unsupported language: {label}"),
        });
    }

    let (tx, rx) = oneshot::channel();
    let message = SubmitMessage {
        request,
        responder: tx,
    };

    if queue.try_push(message).await.is_err() {
        log::warn!("Submission rejected: grading queue is full");
        return HttpResponse::ServiceUnavailable().json(ErrorResponse {
            reason: "ERR_BUSY",
            code: 7,
        });
    }

    match rx.await {
        Ok(history) => HttpResponse::Ok().json(history),
        Err(e) => {
            log::error!("Failed to receive grading result: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            })
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct HistoryQuery {
    pub user_id: u32,
    pub problem_name: String,
}

/// Newest-first submission history for one user on one problem. Unknown
/// users or problems simply have no history.
#[get("/submissions")]
pub async fn get_submissions_handler(
    pool: web::Data<SqlitePool>,
    query: web::Query<HistoryQuery>,
) -> impl Responder {
    match db::history_for(query.user_id, &query.problem_name, &pool).await {
        Ok(history) => HttpResponse::Ok().json(history),
        Err(e) => {
            log::error!("Failed to read submission history: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}
