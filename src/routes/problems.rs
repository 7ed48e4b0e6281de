use actix_web::{HttpResponse, Responder, get, web};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::users::UserProgress;
use super::{ErrorResponse, ErrorResponseWithMessage};
use crate::config::{Catalog, Difficulty};
use crate::database as db;

/// Public view of a problem; never includes the tests or the entry point.
#[derive(Serialize, Debug)]
pub struct ProblemView {
    pub id: u32,
    pub name: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub acceptance_rate: f64,
    pub submission_count: u64,
    pub accepted_count: u64,
    /// "solved" or "attempted" for the requesting user, absent otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
}

#[derive(Deserialize, Debug)]
pub struct ProblemsQuery {
    pub search: Option<String>,
    pub difficulty: Option<String>,
    pub acceptance: Option<String>,
    pub title: Option<String>,
    pub user_id: Option<u32>,
}

#[derive(Deserialize, Debug)]
pub struct ProblemDetailQuery {
    pub user_id: Option<u32>,
}

#[derive(Clone, Copy)]
enum Order {
    Asc,
    Desc,
}

/// An absent or empty parameter means "leave the order alone".
fn parse_order(value: &Option<String>) -> Result<Option<Order>, String> {
    match value.as_deref() {
        None | Some("") => Ok(None),
        Some("asc") => Ok(Some(Order::Asc)),
        Some("desc") => Ok(Some(Order::Desc)),
        Some(other) => Err(format!("invalid sort order: {other:?}")),
    }
}

#[get("/problems")]
pub async fn get_problems_handler(
    pool: web::Data<SqlitePool>,
    catalog: web::Data<Catalog>,
    query: web::Query<ProblemsQuery>,
) -> impl Responder {
    let orders = (
        parse_order(&query.title),
        parse_order(&query.difficulty),
        parse_order(&query.acceptance),
    );
    let (title_order, difficulty_order, acceptance_order) = match orders {
        (Ok(t), Ok(d), Ok(a)) => (t, d, a),
        (Err(message), ..) | (_, Err(message), _) | (.., Err(message)) => {
            return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
                reason: "ERR_INVALID_ARGUMENT",
                code: 1,
                message,
            });
        }
    };

    let stats = match db::problem_stats_map(&pool).await {
        Ok(stats) => stats,
        Err(e) => {
            log::error!("Failed to read problem stats: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    let progress = match load_overlay(query.user_id, &pool).await {
        Ok(progress) => progress,
        Err(response) => return response,
    };

    let search = query.search.as_deref().unwrap_or("").to_lowercase();
    let mut views: Vec<ProblemView> = catalog
        .as_ref()
        .iter()
        .filter(|problem| {
            search.is_empty()
                || problem.name.to_lowercase().contains(&search)
                || problem.title.to_lowercase().contains(&search)
        })
        .map(|problem| {
            let (submissions, accepted) = stats
                .get(&problem.name)
                .copied()
                .unwrap_or((0, 0));
            ProblemView {
                id: problem.id,
                name: problem.name.clone(),
                title: problem.title.clone(),
                difficulty: problem.difficulty,
                acceptance_rate: acceptance_rate(submissions, accepted),
                submission_count: submissions,
                accepted_count: accepted,
                status: progress
                    .as_ref()
                    .and_then(|progress| user_status(progress, &problem.name)),
            }
        })
        .collect();

    // The sorts are stable and applied in fixed sequence, so when several
    // are requested the later ones dominate: title, then difficulty, then
    // acceptance.
    if let Some(order) = title_order {
        sort_with(&mut views, order, |a, b| a.id.cmp(&b.id));
    }
    if let Some(order) = difficulty_order {
        sort_with(&mut views, order, |a, b| a.difficulty.cmp(&b.difficulty));
    }
    if let Some(order) = acceptance_order {
        sort_with(&mut views, order, |a, b| {
            a.acceptance_rate.total_cmp(&b.acceptance_rate)
        });
    }

    HttpResponse::Ok().json(views)
}

#[get("/problems/{name}")]
pub async fn get_problem_handler(
    pool: web::Data<SqlitePool>,
    catalog: web::Data<Catalog>,
    path: web::Path<String>,
    query: web::Query<ProblemDetailQuery>,
) -> impl Responder {
    let name = path.into_inner();
    let Some(problem) = catalog.as_ref().iter().find(|p| p.name == name) else {
        return HttpResponse::NotFound().json(ErrorResponse {
            reason: "ERR_NOT_FOUND",
            code: 3,
        });
    };

    let (submissions, accepted) = match db::problem_stats_for(&problem.name, &pool).await {
        Ok(counters) => counters,
        Err(e) => {
            log::error!("Failed to read stats for problem {name}: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    let progress = match load_overlay(query.user_id, &pool).await {
        Ok(progress) => progress,
        Err(response) => return response,
    };

    HttpResponse::Ok().json(ProblemView {
        id: problem.id,
        name: problem.name.clone(),
        title: problem.title.clone(),
        difficulty: problem.difficulty,
        acceptance_rate: acceptance_rate(submissions, accepted),
        submission_count: submissions,
        accepted_count: accepted,
        status: progress
            .as_ref()
            .and_then(|progress| user_status(progress, &problem.name)),
    })
}

/// Loads the requesting user's progress when a user_id is given. An unknown
/// user gets no overlay rather than an error.
async fn load_overlay(
    user_id: Option<u32>,
    pool: &SqlitePool,
) -> Result<Option<UserProgress>, HttpResponse> {
    let Some(user_id) = user_id else {
        return Ok(None);
    };
    match db::load_progress(user_id, pool).await {
        Ok(progress) => Ok(progress),
        Err(e) => {
            log::error!("Failed to load progress for user {user_id}: {e}");
            Err(HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            }))
        }
    }
}

fn user_status(progress: &UserProgress, problem_name: &str) -> Option<&'static str> {
    if progress.solved.iter().any(|name| name == problem_name) {
        Some("solved")
    } else if progress.attempted.iter().any(|name| name == problem_name) {
        Some("attempted")
    } else {
        None
    }
}

fn acceptance_rate(submissions: u64, accepted: u64) -> f64 {
    if submissions == 0 {
        0.0
    } else {
        accepted as f64 / submissions as f64
    }
}

fn sort_with<F>(views: &mut [ProblemView], order: Order, compare: F)
where
    F: Fn(&ProblemView, &ProblemView) -> std::cmp::Ordering,
{
    match order {
        Order::Asc => views.sort_by(|a, b| compare(a, b)),
        Order::Desc => views.sort_by(|a, b| compare(b, a)),
    }
}
