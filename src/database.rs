use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::routes::{Submission, User, UserProgress};
use crate::verdict::Verdict;

const DATABASE_NAME: &str = "dojo.sqlite3";

pub fn get_db_path() -> PathBuf {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "dojo").expect("Unable to find user directory");
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir).expect("Failed to create local data dir");

    data_dir.join(DATABASE_NAME)
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display()); // rwc = read/write/create
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(0) // Allow pool to shrink when idle
        .connect(&db_url)
        .await?;

    // Execute PRAGMA statements first (these cannot be run inside a transaction)
    for pragma_sql in &[
        "PRAGMA foreign_keys = ON;",
        "PRAGMA busy_timeout = 2000;", // 2 seconds timeout for lock contention
        "PRAGMA journal_mode = WAL;",  // Write-Ahead Logging for better concurrency
        "PRAGMA synchronous = NORMAL;", // Balance between safety and performance
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }

    // Use a transaction for table creation and data initialization
    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS users (
            id            INTEGER PRIMARY KEY,
            name          TEXT    NOT NULL UNIQUE,
            solved_count  INTEGER NOT NULL DEFAULT 0
        );",
        r"
        CREATE TABLE IF NOT EXISTS solved (
            user_id       INTEGER NOT NULL,
            problem_name  TEXT    NOT NULL,
            PRIMARY KEY (user_id, problem_name),
            FOREIGN KEY (user_id) REFERENCES users (id)
        );",
        r"
        CREATE TABLE IF NOT EXISTS attempted (
            user_id       INTEGER NOT NULL,
            problem_name  TEXT    NOT NULL,
            PRIMARY KEY (user_id, problem_name),
            FOREIGN KEY (user_id) REFERENCES users (id)
        );",
        r"
        CREATE TABLE IF NOT EXISTS submissions (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id          INTEGER NOT NULL,
            problem_name     TEXT    NOT NULL,
            status           TEXT    NOT NULL,
            error            TEXT,
            created_time     TEXT    NOT NULL,
            runtime_us       INTEGER NOT NULL,
            language         TEXT    NOT NULL,
            memory_kb        INTEGER NOT NULL,
            code_body        TEXT    NOT NULL,
            input            TEXT,
            expected_output  TEXT,
            user_output      TEXT,
            FOREIGN KEY (user_id) REFERENCES users (id)
        );",
        r"
        CREATE INDEX IF NOT EXISTS idx_submissions_user_problem
        ON submissions (user_id, problem_name);",
        r"
        CREATE TABLE IF NOT EXISTS problem_stats (
            problem_name      TEXT    PRIMARY KEY,
            submission_count  INTEGER NOT NULL DEFAULT 0,
            accepted_count    INTEGER NOT NULL DEFAULT 0
        );",
        "INSERT OR IGNORE INTO users (id, name) VALUES (0, 'root');",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // Remove WAL and SHM files (ignore errors as they might not exist)
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    // Remove main database file
    if let Err(e) = std::fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

/// Hands out one async mutex per user id.
///
/// A worker holds the user's mutex across its record-then-read sequence, so
/// two concurrent submissions by the same user are applied one after the
/// other and neither can clobber the other's progress update. Entries live
/// for the process lifetime; the registry itself is guarded by a plain
/// parking_lot mutex since insertion is cheap.
#[derive(Default)]
pub struct UserLocks {
    locks: parking_lot::Mutex<HashMap<u32, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_user(&self, user_id: u32) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(user_id).or_default().clone()
    }
}

pub async fn find_user(id: u32, pool: &SqlitePool) -> sqlx::Result<bool> {
    let result = sqlx::query_scalar::<_, i32>("SELECT 1 FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(result.is_some())
}

/// Check if a user name is already taken
pub async fn user_name_exists(name: &str, pool: &SqlitePool) -> sqlx::Result<bool> {
    let result = sqlx::query_scalar::<_, i32>("SELECT 1 FROM users WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(result.is_some())
}

/// Creates a user, letting SQLite allocate the id so concurrent creates
/// can never collide. Returns `None` when the name is already taken.
pub async fn create_user(name: &str, pool: &SqlitePool) -> sqlx::Result<Option<User>> {
    let result = sqlx::query("INSERT INTO users (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await;

    match result {
        Ok(done) => Ok(Some(User {
            id: done.last_insert_rowid().clamp(0, i64::from(u32::MAX)) as u32,
            name: name.to_string(),
        })),
        Err(e) if is_unique_violation(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

/// Applies one graded submission to a user's ledger in a single transaction.
///
/// The transaction covers:
///
/// - appending the attempt to the submission history, whatever its verdict;
/// - on a first Accepted verdict for the problem: adding it to the solved
///   set, bumping the user's solved count, and clearing any attempted mark;
/// - on a non-Accepted verdict for a problem not yet solved: marking it
///   attempted (solved problems never regress to attempted);
/// - bumping the problem's submission and accepted counters.
///
/// Re-accepting an already solved problem changes nothing but the history
/// and the counters, so the solved set and solved count stay idempotent.
pub async fn record_submission(
    user_id: u32,
    submission: &Submission,
    pool: &SqlitePool,
) -> sqlx::Result<()> {
    let accepted = submission.status == Verdict::Accepted;
    let mut tx = pool.begin().await?;

    sqlx::query(
        r"
        INSERT INTO submissions
            (user_id, problem_name, status, error, created_time, runtime_us,
             language, memory_kb, code_body, input, expected_output, user_output)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(user_id)
    .bind(&submission.problem_name)
    .bind(submission.status.as_str())
    .bind(&submission.error)
    .bind(&submission.time)
    .bind(submission.runtime)
    .bind(&submission.language)
    .bind(submission.memory)
    .bind(&submission.code_body)
    .bind(submission.input.as_ref().map(|v| v.to_string()))
    .bind(submission.expected_output.as_ref().map(|v| v.to_string()))
    .bind(submission.user_output.as_ref().map(|v| v.to_string()))
    .execute(tx.as_mut())
    .await?;

    if accepted {
        let newly_solved =
            sqlx::query("INSERT OR IGNORE INTO solved (user_id, problem_name) VALUES (?, ?)")
                .bind(user_id)
                .bind(&submission.problem_name)
                .execute(tx.as_mut())
                .await?
                .rows_affected();

        if newly_solved > 0 {
            sqlx::query("UPDATE users SET solved_count = solved_count + 1 WHERE id = ?")
                .bind(user_id)
                .execute(tx.as_mut())
                .await?;
            sqlx::query("DELETE FROM attempted WHERE user_id = ? AND problem_name = ?")
                .bind(user_id)
                .bind(&submission.problem_name)
                .execute(tx.as_mut())
                .await?;
        }
    } else {
        sqlx::query(
            r"
            INSERT OR IGNORE INTO attempted (user_id, problem_name)
            SELECT ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM solved WHERE user_id = ? AND problem_name = ?
            )
            ",
        )
        .bind(user_id)
        .bind(&submission.problem_name)
        .bind(user_id)
        .bind(&submission.problem_name)
        .execute(tx.as_mut())
        .await?;
    }

    sqlx::query(
        r"
        INSERT INTO problem_stats (problem_name, submission_count, accepted_count)
        VALUES (?, 1, ?)
        ON CONFLICT(problem_name) DO UPDATE SET
            submission_count = submission_count + 1,
            accepted_count = accepted_count + excluded.accepted_count
        ",
    )
    .bind(&submission.problem_name)
    .bind(accepted as i64)
    .execute(tx.as_mut())
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Newest-first submission history for one user on one problem.
pub async fn history_for(
    user_id: u32,
    problem_name: &str,
    pool: &SqlitePool,
) -> sqlx::Result<Vec<Submission>> {
    #[derive(sqlx::FromRow)]
    struct SubmissionRow {
        problem_name: String,
        status: String,
        error: Option<String>,
        created_time: String,
        runtime_us: i64,
        language: String,
        memory_kb: i64,
        code_body: String,
        input: Option<String>,
        expected_output: Option<String>,
        user_output: Option<String>,
    }

    let rows = sqlx::query_as::<_, SubmissionRow>(
        r"
        SELECT problem_name, status, error, created_time, runtime_us,
               language, memory_kb, code_body, input, expected_output, user_output
        FROM submissions
        WHERE user_id = ? AND problem_name = ?
        ORDER BY id DESC
        ",
    )
    .bind(user_id)
    .bind(problem_name)
    .fetch_all(pool)
    .await?;

    let parse_value = |text: Option<String>| {
        text.as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    };

    Ok(rows
        .into_iter()
        .map(|row| Submission {
            problem_name: row.problem_name,
            // Rows are only ever written with known labels
            status: Verdict::from_label(&row.status).unwrap_or(Verdict::RuntimeError),
            error: row.error,
            time: row.created_time,
            runtime: row.runtime_us.clamp(0, i64::from(u32::MAX)) as u32,
            language: row.language,
            memory: row.memory_kb.clamp(0, i64::from(u32::MAX)) as u32,
            code_body: row.code_body,
            input: parse_value(row.input),
            expected_output: parse_value(row.expected_output),
            user_output: parse_value(row.user_output),
        })
        .collect())
}

/// A user's identity, solved count and the two progress sets; `None` for an
/// unknown user.
pub async fn load_progress(user_id: u32, pool: &SqlitePool) -> sqlx::Result<Option<UserProgress>> {
    let row = sqlx::query_as::<_, (u32, String, i64)>(
        "SELECT id, name, solved_count FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some((id, name, solved_count)) = row else {
        return Ok(None);
    };

    let solved: Vec<String> =
        sqlx::query_scalar("SELECT problem_name FROM solved WHERE user_id = ? ORDER BY problem_name")
            .bind(user_id)
            .fetch_all(pool)
            .await?;
    let attempted: Vec<String> = sqlx::query_scalar(
        "SELECT problem_name FROM attempted WHERE user_id = ? ORDER BY problem_name",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(Some(UserProgress {
        user: User { id, name },
        solved_count: solved_count.clamp(0, i64::from(u32::MAX)) as u32,
        solved,
        attempted,
    }))
}

/// Per-problem (submission_count, accepted_count) counters for all problems
/// that have any recorded submissions.
pub async fn problem_stats_map(pool: &SqlitePool) -> sqlx::Result<HashMap<String, (u64, u64)>> {
    let rows = sqlx::query_as::<_, (String, i64, i64)>(
        "SELECT problem_name, submission_count, accepted_count FROM problem_stats",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(name, submissions, accepted)| {
            (name, (submissions.max(0) as u64, accepted.max(0) as u64))
        })
        .collect())
}

/// Counters for one problem; zeroes when it has never been submitted to.
pub async fn problem_stats_for(problem_name: &str, pool: &SqlitePool) -> sqlx::Result<(u64, u64)> {
    let row = sqlx::query_as::<_, (i64, i64)>(
        "SELECT submission_count, accepted_count FROM problem_stats WHERE problem_name = ?",
    )
    .bind(problem_name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map_or((0, 0), |(submissions, accepted)| {
        (submissions.max(0) as u64, accepted.max(0) as u64)
    }))
}
