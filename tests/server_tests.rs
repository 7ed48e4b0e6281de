use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use actix_web::{App, test, web};
use assert_json_diff::assert_json_include;
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use sqlx::sqlite::SqlitePool;

use dojo::config::{Catalog, Difficulty, Problem, RunnerConfig, RunnerSpec, TestCase};
use dojo::database as db;
use dojo::queue::SubmitQueue;
use dojo::routes::{
    SubmitMessage, Submission, get_problem_handler, get_problems_handler,
    get_submissions_handler, get_user_handler, json_error_handler, post_submission_handler,
    post_user_handler, query_error_handler,
};
use dojo::verdict::Verdict;

// Global counter to ensure unique test database names
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

// Helper function to create isolated test database
async fn create_test_db() -> (SqlitePool, String) {
    // Create a unique database file for each test
    let test_id = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_name = format!("test_dojo_{}.db", test_id);
    let db_path = format!("data/{}", db_name);

    // Remove existing test database if it exists
    let _ = fs::remove_file(&db_path);

    let db_pool = db::init_db(&db_path).await.unwrap();

    // Root (id 0) is seeded by init_db; add a few named users on top
    for (i, name) in [(1u32, "test_user_1"), (2, "test_user_2"), (3, "test_user_3")] {
        sqlx::query("INSERT OR IGNORE INTO users (id, name) VALUES (?, ?)")
            .bind(i)
            .bind(name)
            .execute(&db_pool)
            .await
            .unwrap();
    }

    (db_pool, db_path)
}

// Helper function to cleanup test database
fn cleanup_test_db(db_path: &str) {
    if let Err(e) = fs::remove_file(db_path) {
        eprintln!("Warning: Failed to remove test database {}: {}", db_path, e);
    }

    // Also remove WAL and SHM files if they exist
    let wal_path = format!("{}-wal", db_path);
    let shm_path = format!("{}-shm", db_path);
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);
}

// Test guard that ensures cleanup on drop
struct TestDbGuard {
    db_path: String,
}

impl TestDbGuard {
    fn new(db_path: String) -> Self {
        Self { db_path }
    }
}

impl Drop for TestDbGuard {
    fn drop(&mut self) {
        cleanup_test_db(&self.db_path);
    }
}

fn test_problem(
    id: u32,
    name: &str,
    title: &str,
    difficulty: Difficulty,
    function_name: &str,
) -> Problem {
    Problem {
        id,
        name: name.to_string(),
        title: title.to_string(),
        difficulty,
        function_name: function_name.to_string(),
        tests: vec![TestCase {
            input: json!([[2, 7, 11, 15], 9]),
            expected: json!([0, 1]),
        }],
    }
}

// Helper function to create test config
fn create_test_config() -> (Arc<Catalog>, Arc<RunnerConfig>) {
    let catalog = vec![
        test_problem(1, "two-sum", "Two Sum", Difficulty::Easy, "twoSum"),
        test_problem(
            2,
            "reverse-string",
            "Reverse String",
            Difficulty::Easy,
            "reverseString",
        ),
        test_problem(
            3,
            "longest-substring",
            "Longest Substring Without Repeating Characters",
            Difficulty::Medium,
            "lengthOfLongestSubstring",
        ),
        test_problem(
            4,
            "median-of-two-sorted-arrays",
            "Median of Two Sorted Arrays",
            Difficulty::Hard,
            "findMedianSortedArrays",
        ),
    ];

    (Arc::new(catalog), Arc::new(RunnerSpec::builtin()))
}

// Mock worker that answers every submission with a canned accepted record
async fn mock_worker(queue: Arc<SubmitQueue>) {
    loop {
        let SubmitMessage { request, responder } = queue.pop().await;
        let record = Submission {
            problem_name: request.problem_name.clone(),
            status: Verdict::Accepted,
            error: None,
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            runtime: 150,
            language: request.language.clone().unwrap_or("Python".to_string()),
            memory: 9216,
            code_body: request.code.clone(),
            input: None,
            expected_output: None,
            user_output: None,
        };
        let _ = responder.send(vec![record]);
    }
}

fn make_submission(problem: &str, status: Verdict, time: &str) -> Submission {
    Submission {
        problem_name: problem.to_string(),
        status,
        error: None,
        time: time.to_string(),
        runtime: 150,
        language: "Python".to_string(),
        memory: 8192,
        code_body: "def twoSum(nums, target):\n    return [0, 1]\n".to_string(),
        input: None,
        expected_output: None,
        user_output: None,
    }
}

#[actix_web::test]
async fn test_post_submission_returns_worker_history() {
    let (_catalog, runners) = create_test_config();
    let queue = Arc::new(SubmitQueue::new(16));

    tokio::spawn(mock_worker(queue.clone()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(runners))
            .app_data(web::Data::from(queue))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(post_submission_handler),
    )
    .await;

    let request_body = json!({
        "user_id": 1,
        "problem_name": "two-sum",
        "code": "def twoSum(nums, target):\n    return [0, 1]\n",
        "language": "Python"
    });

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(&request_body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    let history = body.as_array().expect("history should be an array");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["problem_name"], "two-sum");
    assert_eq!(history[0]["status"], "Accepted");
    assert_eq!(history[0]["language"], "Python");
    assert_eq!(history[0]["runtime"], 150);
    assert!(history[0]["error"].is_null());
}

// Validation happens before the queue and the database are ever touched,
// so the rejection tests run against the route alone.
#[actix_web::test]
async fn test_post_submission_empty_code() {
    let (_catalog, runners) = create_test_config();
    let queue = Arc::new(SubmitQueue::new(16));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(runners))
            .app_data(web::Data::from(queue))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(post_submission_handler),
    )
    .await;

    let request_body = json!({
        "user_id": 1,
        "problem_name": "two-sum",
        "code": "   \n  ",
        "language": "Python"
    });

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(&request_body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_INVALID_ARGUMENT");
    assert_eq!(body["code"], 1);
    assert_eq!(body["message"], "code must not be empty");
}

#[actix_web::test]
async fn test_post_submission_unknown_language() {
    let (_catalog, runners) = create_test_config();
    let queue = Arc::new(SubmitQueue::new(16));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(runners))
            .app_data(web::Data::from(queue))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(post_submission_handler),
    )
    .await;

    let request_body = json!({
        "user_id": 1,
        "problem_name": "two-sum",
        "code": "IDENTIFICATION DIVISION.",
        "language": "Cobol"
    });

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(&request_body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_INVALID_ARGUMENT");
    assert_eq!(body["code"], 1);
    assert_eq!(body["message"], "unsupported language: Cobol");
}

#[actix_web::test]
async fn test_post_submission_queue_full() {
    let (_catalog, runners) = create_test_config();
    // Zero capacity and no worker: admission control must turn the request away
    let queue = Arc::new(SubmitQueue::new(0));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(runners))
            .app_data(web::Data::from(queue))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(post_submission_handler),
    )
    .await;

    let request_body = json!({
        "user_id": 1,
        "problem_name": "two-sum",
        "code": "def twoSum(nums, target):\n    return [0, 1]\n",
        "language": "Python"
    });

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(&request_body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_BUSY");
    assert_eq!(body["code"], 7);
}

#[actix_web::test]
async fn test_post_submission_invalid_json() {
    let (_catalog, runners) = create_test_config();
    let queue = Arc::new(SubmitQueue::new(16));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(runners))
            .app_data(web::Data::from(queue))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(post_submission_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_payload("invalid json")
        .insert_header(("content-type", "application/json"))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_INVALID_ARGUMENT");
    assert_eq!(body["code"], 1);
}

#[actix_web::test]
async fn test_get_submissions_empty_and_missing_params() {
    let (db_pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .service(get_submissions_handler),
    )
    .await;

    // No history yet
    let req = test::TestRequest::get()
        .uri("/submissions?user_id=1&problem_name=two-sum")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, json!([]));

    // Missing user_id fails query deserialization
    let req = test::TestRequest::get()
        .uri("/submissions?problem_name=two-sum")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_INVALID_ARGUMENT");
}

#[actix_web::test]
async fn test_get_submissions_newest_first() {
    let (db_pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);

    let mut wrong = make_submission("two-sum", Verdict::WrongAnswer, "2026-08-20T10:00:00.000Z");
    wrong.input = Some(json!([[2, 7, 11, 15], 9]));
    wrong.expected_output = Some(json!([0, 1]));
    wrong.user_output = Some(json!([1, 0]));
    db::record_submission(1, &wrong, &db_pool).await.unwrap();

    let accepted = make_submission("two-sum", Verdict::Accepted, "2026-08-20T10:05:00.000Z");
    db::record_submission(1, &accepted, &db_pool).await.unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .service(get_submissions_handler),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/submissions?user_id=1&problem_name=two-sum")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    let history = body.as_array().expect("history should be an array");
    assert_eq!(history.len(), 2);

    // Most recent attempt first
    assert_eq!(history[0]["status"], "Accepted");
    assert_eq!(history[0]["time"], "2026-08-20T10:05:00.000Z");
    assert!(history[0]["input"].is_null());

    // The failing attempt keeps its diagnostic triple
    assert_eq!(history[1]["status"], "Wrong Answer");
    assert_eq!(history[1]["input"], json!([[2, 7, 11, 15], 9]));
    assert_eq!(history[1]["expected_output"], json!([0, 1]));
    assert_eq!(history[1]["user_output"], json!([1, 0]));

    // History is scoped to the (user, problem) pair
    let req = test::TestRequest::get()
        .uri("/submissions?user_id=2&problem_name=two-sum")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, json!([]));
}

#[actix_web::test]
async fn test_get_problems_listing_defaults() {
    let (db_pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);
    let (catalog, _runners) = create_test_config();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::from(catalog))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .service(get_problems_handler),
    )
    .await;

    let req = test::TestRequest::get().uri("/problems").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    let listing = body.as_array().expect("listing should be an array");
    assert_eq!(listing.len(), 4);

    // Catalog order when no sort is requested
    assert_eq!(listing[0]["name"], "two-sum");
    assert_eq!(listing[1]["name"], "reverse-string");

    // Untouched problems report zero counters, and no per-user status
    assert_eq!(listing[0]["submission_count"], 0);
    assert_eq!(listing[0]["accepted_count"], 0);
    assert_eq!(listing[0]["acceptance_rate"], 0.0);
    assert!(listing[0].get("status").is_none());

    // The listing never leaks grading material
    assert!(listing[0].get("tests").is_none());
    assert!(listing[0].get("function_name").is_none());
}

#[actix_web::test]
async fn test_get_problems_sorting() {
    let (db_pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);
    let (catalog, _runners) = create_test_config();

    // two-sum: 1 accepted out of 2; reverse-string: 1 out of 1
    let wrong = make_submission("two-sum", Verdict::WrongAnswer, "2026-08-20T10:00:00.000Z");
    db::record_submission(1, &wrong, &db_pool).await.unwrap();
    let accepted = make_submission("two-sum", Verdict::Accepted, "2026-08-20T10:01:00.000Z");
    db::record_submission(1, &accepted, &db_pool).await.unwrap();
    let accepted = make_submission(
        "reverse-string",
        Verdict::Accepted,
        "2026-08-20T10:02:00.000Z",
    );
    db::record_submission(1, &accepted, &db_pool).await.unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::from(catalog))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .service(get_problems_handler),
    )
    .await;

    // Highest acceptance rate first
    let req = test::TestRequest::get()
        .uri("/problems?acceptance=desc")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    let listing = body.as_array().unwrap();
    assert_eq!(listing[0]["name"], "reverse-string");
    assert_eq!(listing[0]["acceptance_rate"], 1.0);
    assert_eq!(listing[1]["name"], "two-sum");
    assert_eq!(listing[1]["acceptance_rate"], 0.5);

    // Hardest first; ties keep catalog order
    let req = test::TestRequest::get()
        .uri("/problems?difficulty=desc")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    let listing = body.as_array().unwrap();
    assert_eq!(listing[0]["difficulty"], "hard");
    assert_eq!(listing[1]["difficulty"], "medium");
    assert_eq!(listing[2]["name"], "two-sum");
    assert_eq!(listing[3]["name"], "reverse-string");

    // An unknown order value is rejected
    let req = test::TestRequest::get()
        .uri("/problems?difficulty=sideways")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_INVALID_ARGUMENT");
}

#[actix_web::test]
async fn test_get_problems_search_and_user_overlay() {
    let (db_pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);
    let (catalog, _runners) = create_test_config();

    let accepted = make_submission("two-sum", Verdict::Accepted, "2026-08-20T10:00:00.000Z");
    db::record_submission(1, &accepted, &db_pool).await.unwrap();
    let wrong = make_submission(
        "longest-substring",
        Verdict::WrongAnswer,
        "2026-08-20T10:01:00.000Z",
    );
    db::record_submission(1, &wrong, &db_pool).await.unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::from(catalog))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .service(get_problems_handler),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/problems?user_id=1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    let listing = body.as_array().unwrap();
    assert_eq!(listing[0]["name"], "two-sum");
    assert_eq!(listing[0]["status"], "solved");
    assert_eq!(listing[2]["name"], "longest-substring");
    assert_eq!(listing[2]["status"], "attempted");
    assert!(listing[1].get("status").is_none());

    // Search matches against name and title, case-insensitively
    let req = test::TestRequest::get()
        .uri("/problems?search=SUM")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    let listing = body.as_array().unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0]["name"], "two-sum");

    let req = test::TestRequest::get()
        .uri("/problems?search=median")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    // An unknown user id simply gets no overlay
    let req = test::TestRequest::get()
        .uri("/problems?user_id=999")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body.as_array().unwrap()[0].get("status").is_none());
}

#[actix_web::test]
async fn test_get_problem_detail() {
    let (db_pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);
    let (catalog, _runners) = create_test_config();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::from(catalog))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .service(get_problem_handler),
    )
    .await;

    let req = test::TestRequest::get().uri("/problems/two-sum").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["id"], 1);
    assert_eq!(body["name"], "two-sum");
    assert_eq!(body["title"], "Two Sum");
    assert_eq!(body["difficulty"], "easy");

    // Grading material stays server-side
    assert!(body.get("tests").is_none());
    assert!(body.get("function_name").is_none());

    let req = test::TestRequest::get()
        .uri("/problems/no-such-problem")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_NOT_FOUND");
    assert_eq!(body["code"], 3);
}

#[actix_web::test]
async fn test_post_users_create_conflict_and_empty() {
    let (db_pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(post_user_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/users")
        .set_json(json!({"name": "alice"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = test::read_body_json(resp).await;
    // Seeded users occupy ids 0 through 3
    assert_eq!(body["id"], 4);
    assert_eq!(body["name"], "alice");

    // The same name again conflicts
    let req = test::TestRequest::post()
        .uri("/users")
        .set_json(json!({"name": "alice"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_CONFLICT");
    assert_eq!(body["code"], 4);

    // Whitespace-only names are rejected
    let req = test::TestRequest::post()
        .uri("/users")
        .set_json(json!({"name": "   "}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_INVALID_ARGUMENT");
    assert_eq!(body["code"], 1);
}

#[actix_web::test]
async fn test_get_user_profile() {
    let (db_pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard::new(db_path);
    let (catalog, _runners) = create_test_config();

    let accepted = make_submission("two-sum", Verdict::Accepted, "2026-08-20T10:00:00.000Z");
    db::record_submission(1, &accepted, &db_pool).await.unwrap();
    let wrong = make_submission(
        "median-of-two-sorted-arrays",
        Verdict::WrongAnswer,
        "2026-08-20T10:01:00.000Z",
    );
    db::record_submission(1, &wrong, &db_pool).await.unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::from(catalog))
            .service(get_user_handler),
    )
    .await;

    let req = test::TestRequest::get().uri("/users/1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: body,
        expected: json!({
            "id": 1,
            "name": "test_user_1",
            "solved_count": 1,
            "problems_solved": ["two-sum"],
            "problems_attempted": ["median-of-two-sorted-arrays"],
            "easy_solved": 1,
            "medium_solved": 0,
            "hard_solved": 0,
            "easy_total": 2,
            "medium_total": 1,
            "hard_total": 1,
        })
    );

    let req = test::TestRequest::get().uri("/users/999").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_NOT_FOUND");
    assert_eq!(body["code"], 3);
}
