use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use dojo::config::{CliArgs, Config};
use dojo::database as db;
use dojo::queue::SubmitQueue;
use dojo::sandbox::RunLimits;
use dojo::web_server::build_server;
use dojo::worker::worker;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let db_path = db::get_db_path();
    let cli = CliArgs::parse();
    let n_workers = cli.workers;

    if n_workers == 0 {
        panic!("The number of grading workers must not be 0");
    }

    let Config {
        server: server_config,
        limits,
        problems: catalog,
        runners,
    } = cli.to_config().expect("Failed to load configuration");

    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path)
        .await
        .expect("Failed to initialize database");

    let catalog = Arc::new(catalog);
    let runners = Arc::new(runners);
    let db_pool = Arc::new(db_pool);
    let queue = Arc::new(SubmitQueue::new(limits.queue_capacity));
    let user_locks = Arc::new(db::UserLocks::new());
    let run_limits = RunLimits::from_config(&limits);
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=n_workers {
        workers.spawn(worker(
            i,
            catalog.clone(),
            runners.clone(),
            run_limits.clone(),
            db_pool.clone(),
            queue.clone(),
            user_locks.clone(),
            shutdown_token.clone(),
        ));
    }

    let server = build_server(server_config, catalog, runners, db_pool, queue)
        .expect("Failed to build server");

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {:?}", res_worker);
        }
    }

    // 1. Shutdown actix-web server gracefully
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                log::error!("Worker handle panicked: {:?}", e);
            } else {
                log::error!("Worker handle finished with error: {:?}", e);
            }
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
