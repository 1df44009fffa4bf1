use actix_web::{web, HttpResponse, Responder};
use scanforge_core::SecurityTest;

use super::error_response;
use crate::state::AppState;

pub fn configure_security_test_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::post().to(create_security_test)); // POST /securitytest
}

async fn create_security_test(
    state: web::Data<AppState>,
    body: web::Json<SecurityTest>,
) -> impl Responder {
    let test = body.into_inner();
    match state.catalog.create_security_test(&test).await {
        Ok(()) => HttpResponse::Created().json(serde_json::json!({
            "result": "created",
            "details": format!("securityTest {} created.", test.name)
        })),
        Err(e) => error_response(&e),
    }
}
