use actix_web::{web, HttpResponse, Responder};
use scanforge_core::Repository;

use super::error_response;
use crate::state::AppState;

pub fn configure_repository_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::post().to(create_repository)); // POST /repository
}

async fn create_repository(
    state: web::Data<AppState>,
    body: web::Json<Repository>,
) -> impl Responder {
    match state.catalog.create_repository(&body).await {
        Ok(repository) => HttpResponse::Created().json(serde_json::json!({
            "result": "created",
            "details": "Repository created.",
            "repositoryURL": repository.url,
            "repositoryBranch": repository.branch
        })),
        Err(e) => error_response(&e),
    }
}
