use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};
use sqlx::sqlite::SqlitePool;

use crate::config::{Catalog, RunnerConfig, ServerConfig};
use crate::queue::SubmitQueue;
use crate::routes::{
    get_problem_handler, get_problems_handler, get_submissions_handler, get_user_handler,
    json_error_handler, post_submission_handler, post_user_handler, query_error_handler,
};

pub fn build_server(
    server_config: ServerConfig,
    catalog: Arc<Catalog>,
    runners: Arc<RunnerConfig>,
    db_pool: Arc<SqlitePool>,
    queue: Arc<SubmitQueue>,
) -> std::io::Result<Server> {
    let db_pool = web::Data::from(db_pool);
    let catalog = web::Data::from(catalog);
    let runners = web::Data::from(runners);
    let queue = web::Data::from(queue);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(db_pool.clone())
            .app_data(catalog.clone())
            .app_data(runners.clone())
            .app_data(queue.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .wrap(middleware::Logger::default())
            .service(post_submission_handler)
            .service(get_submissions_handler)
            .service(get_problems_handler)
            .service(get_problem_handler)
            .service(post_user_handler)
            .service(get_user_handler)
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or("127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(12345),
    ))?
    .run();

    Ok(server)
}
