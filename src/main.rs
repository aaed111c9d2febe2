use actix_web::web;
use clap::Parser;

use sandbox_scorer::config::{CliArgs, Config};
use sandbox_scorer::sandbox::Scorer;
use sandbox_scorer::web_server::build_server;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        sandbox: sandbox_config,
    } = cli.to_config()?;

    log::info!(
        "Sandbox image {} via `{}`, {} CPU, default limits {}s / {} MB",
        sandbox_config.image,
        sandbox_config.runtime.join(" "),
        sandbox_config.cpus,
        sandbox_config.default_time_limit.0,
        sandbox_config.default_memory_limit.0
    );

    let scorer = web::Data::new(Scorer::from_config(&sandbox_config)?);

    if cli.skip_preflight {
        log::warn!("Skipping container runtime check");
    } else {
        scorer.preflight().await?;
    }

    // ======= PREPARATION END, EXECUTION START =======

    let server = build_server(server_config, scorer.clone())?;
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
    }

    // 1. Tear down running containers so in-flight requests finish quickly
    scorer.shutdown();

    // 2. Stop the server once those requests have answered
    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
