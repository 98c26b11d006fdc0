pub mod auth;
pub mod keys;
pub mod wsroute;

use actix_web::web;

/// Registers every HTTP route. The WebSocket endpoint lives at `chat_path`.
pub fn configure(cfg: &mut web::ServiceConfig, chat_path: &str) {
    cfg.service(auth::status)
        .service(auth::register)
        .service(auth::deregister)
        .service(keys::key_info)
        .service(keys::request_key)
        .service(keys::submit_key)
        .service(web::resource(chat_path).route(web::get().to(wsroute::ws_handler)));
}
