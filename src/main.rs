use actix_web::{web, App, HttpServer};
use cipher_chat_service::{config, error, logging, routes, state::AppState};
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let state = AppState::new(cfg)?;
    let bind_addr = format!("0.0.0.0:{}", state.config.port);
    tracing::info!(
        %bind_addr,
        scheme = %state.config.keys.scheme,
        chat_path = %state.config.chat_path,
        "starting cipher-chat-service"
    );

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);
        let chat_path = state.config.chat_path.clone();

        App::new()
            .wrap(cors)
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(|cfg| routes::configure(cfg, &chat_path))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("http server: {e}")))
}
