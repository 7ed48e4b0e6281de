use actix_web::{HttpResponse, Responder, get, post, web};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::{ErrorResponse, ErrorResponseWithMessage};
use crate::config::{Catalog, Difficulty};
use crate::database as db;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct User {
    pub id: u32,
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct CreateUser {
    pub name: String,
}

/// A user's raw progress as stored by the ledger.
#[derive(Debug)]
pub struct UserProgress {
    pub user: User,
    pub solved_count: u32,
    pub solved: Vec<String>,
    pub attempted: Vec<String>,
}

/// Profile returned by GET /users/{id}: the solved and attempted sets plus
/// per-difficulty tallies against the catalog.
#[derive(Serialize, Debug)]
pub struct UserProfile {
    pub id: u32,
    pub name: String,
    pub solved_count: u32,
    pub problems_solved: Vec<String>,
    pub problems_attempted: Vec<String>,
    pub easy_solved: u32,
    pub medium_solved: u32,
    pub hard_solved: u32,
    pub easy_total: u32,
    pub medium_total: u32,
    pub hard_total: u32,
}

#[post("/users")]
pub async fn post_user_handler(
    pool: web::Data<SqlitePool>,
    body: web::Json<CreateUser>,
) -> impl Responder {
    let name = body.name.trim();
    if name.is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message: "name must not be empty".to_string(),
        });
    }

    // The UNIQUE constraint on the name is the only duplicate check, so
    // concurrent creates with the same name settle inside SQLite.
    match db::create_user(name, &pool).await {
        Ok(Some(user)) => {
            log::info!("Created user {} with id {}", user.name, user.id);
            HttpResponse::Created().json(user)
        }
        Ok(None) => HttpResponse::Conflict().json(ErrorResponseWithMessage {
            reason: "ERR_CONFLICT",
            code: 4,
            message: format!("user name {name:?} is taken"),
        }),
        Err(e) => {
            log::error!("Failed to create user: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[get("/users/{id}")]
pub async fn get_user_handler(
    pool: web::Data<SqlitePool>,
    catalog: web::Data<Catalog>,
    path: web::Path<u32>,
) -> impl Responder {
    let user_id = path.into_inner();
    let progress = match db::load_progress(user_id, &pool).await {
        Ok(Some(progress)) => progress,
        Ok(None) => {
            return HttpResponse::NotFound().json(ErrorResponse {
                reason: "ERR_NOT_FOUND",
                code: 3,
            });
        }
        Err(e) => {
            log::error!("Failed to load profile for user {user_id}: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    HttpResponse::Ok().json(build_profile(progress, catalog.as_ref()))
}

fn build_profile(progress: UserProgress, catalog: &Catalog) -> UserProfile {
    let total = |difficulty: Difficulty| {
        catalog.iter().filter(|p| p.difficulty == difficulty).count() as u32
    };
    let solved_of = |difficulty: Difficulty| {
        catalog
            .iter()
            .filter(|p| p.difficulty == difficulty)
            .filter(|p| progress.solved.iter().any(|name| *name == p.name))
            .count() as u32
    };

    UserProfile {
        id: progress.user.id,
        name: progress.user.name,
        solved_count: progress.solved_count,
        easy_solved: solved_of(Difficulty::Easy),
        medium_solved: solved_of(Difficulty::Medium),
        hard_solved: solved_of(Difficulty::Hard),
        easy_total: total(Difficulty::Easy),
        medium_total: total(Difficulty::Medium),
        hard_total: total(Difficulty::Hard),
        problems_solved: progress.solved,
        problems_attempted: progress.attempted,
    }
}
