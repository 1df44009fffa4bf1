use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;

use super::error_response;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

#[derive(Deserialize)]
pub struct AnalysisRequest {
    #[serde(rename = "repositoryURL")]
    pub url: String,
    #[serde(rename = "repositoryBranch", default)]
    pub branch: String,
}

pub fn configure_analysis_routes(cfg: &mut web::ServiceConfig) {
    cfg
        .route("", web::post().to(receive_request))  // POST /analysis
        .route("/{rid}", web::get().to(get_analysis)); // GET /analysis/{rid}
}

/// 接收扫描请求：立即返回 RID，分析在后台进行
async fn receive_request(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<AnalysisRequest>,
) -> impl Responder {
    let rid = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match state.admission.submit(rid, &body.url, &body.branch).await {
        Ok(admission) => HttpResponse::Ok().json(serde_json::json!({
            "RID": admission.rid,
            "result": "ok",
            "details": "Request received."
        })),
        Err(e) => error_response(&e),
    }
}

async fn get_analysis(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let rid = path.into_inner();
    match state.admission.status(&rid).await {
        Ok(analysis) => HttpResponse::Ok().json(analysis),
        Err(e) => error_response(&e),
    }
}
