use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod launcher;
mod state;
mod store;

use api::configure_api;
use config::ServerConfig;
use state::AppState;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scanforge_web=debug,scanforge_core=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 启动前检查：环境变量、Docker 主机、数据库、默认安全测试
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;

    let state = match AppState::bootstrap(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Requirement check failed: {:#}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(version = %state.config.version.version, "all requirements checked");

    let bind_address = ("0.0.0.0", port);
    tracing::info!("ScanForge API listening on {}:{}", bind_address.0, bind_address.1);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Cors::permissive())
            .wrap(TracingLogger::default())
            .configure(configure_api)
    })
    .bind(bind_address)?
    .run()
    .await?;

    Ok(())
}
