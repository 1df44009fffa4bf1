use actix_web::{error, web, HttpResponse, Responder, Scope};
use scanforge_core::error::CoreError;

use crate::state::AppState;

pub mod analysis;
pub mod repository;
pub mod security_test;

pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/healthcheck", web::get().to(health_check))
        .route("/version", web::get().to(version))
        .service(analysis_routes())
        .service(security_test_routes())
        .service(repository_routes());
}

fn analysis_routes() -> Scope {
    web::scope("/analysis")
        .configure(analysis::configure_analysis_routes)
}

fn security_test_routes() -> Scope {
    web::scope("/securitytest")
        .configure(security_test::configure_security_test_routes)
}

fn repository_routes() -> Scope {
    web::scope("/repository")
        .configure(repository::configure_repository_routes)
}

/// Malformed bodies get the same envelope as every other rejected request.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let response = HttpResponse::BadRequest().json(serde_json::json!({
            "result": "error",
            "details": err.to_string()
        }));
        error::InternalError::from_response(err, response).into()
    })
}

/// CoreError -> HTTP 状态码与统一的响应体
pub fn error_response(e: &CoreError) -> HttpResponse {
    match e {
        CoreError::InvalidInput(details) => HttpResponse::BadRequest().json(serde_json::json!({
            "result": "error",
            "details": details
        })),
        CoreError::NotFound(details) => HttpResponse::NotFound().json(serde_json::json!({
            "result": "error",
            "details": details
        })),
        CoreError::Conflict(details) => HttpResponse::Conflict().json(serde_json::json!({
            "result": "conflict",
            "details": details
        })),
        CoreError::Internal(_) | CoreError::Tool(_) => {
            tracing::error!("Request failed: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "result": "error",
                "details": "Internal error."
            }))
        }
    }
}

async fn health_check() -> impl Responder {
    HttpResponse::Ok().content_type("text/plain").body("WORKING\n")
}

async fn version(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(&state.config.version)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use async_trait::async_trait;
    use scanforge_core::{
        default_security_tests, InMemoryStore, JobLauncher, JobSpec, LaunchError, RepositoryStore,
    };
    use serde_json::{json, Value};

    use super::*;
    use crate::config::ServerConfig;

    /// Accepts every job; none of them ever finishes.
    #[derive(Default)]
    struct IdleLauncher {
        submitted: AtomicUsize,
    }

    #[async_trait]
    impl JobLauncher for IdleLauncher {
        async fn submit(&self, _job: &JobSpec) -> Result<String, LaunchError> {
            Ok(format!("cid-{}", self.submitted.fetch_add(1, Ordering::SeqCst)))
        }

        async fn wait_output(&self, _cid: &str) -> Result<String, LaunchError> {
            std::future::pending().await
        }
    }

    async fn state() -> (Arc<InMemoryStore>, AppState) {
        let vars: HashMap<&str, &str> = HashMap::from([("DOCKER_HOSTS_LIST", "localhost")]);
        let config = ServerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        let store = Arc::new(InMemoryStore::new());
        let state = AppState::assemble(store.clone(), Arc::new(IdleLauncher::default()), config);
        state.catalog.ensure_defaults(&default_security_tests()).await.unwrap();
        (store, state)
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .configure(configure_api),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn healthcheck_and_version() {
        let (_, state) = state().await;
        let app = app!(state);

        let req = test::TestRequest::get().uri("/healthcheck").to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "WORKING\n");

        let req = test::TestRequest::get().uri("/version").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["project"], "scanforge");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[actix_web::test]
    async fn analysis_request_is_accepted_then_single_flighted() {
        let (store, state) = state().await;
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/analysis")
            .insert_header(("X-Request-ID", "rid-42"))
            .set_json(json!({
                "repositoryURL": "https://github.com/org/repo.git",
                "repositoryBranch": "main"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"RID": "rid-42", "result": "ok", "details": "Request received."}));

        // the analysis is created in the background
        let mut snapshot = None;
        for _ in 0..100 {
            let req = test::TestRequest::get().uri("/analysis/rid-42").to_request();
            let resp = test::call_service(&app, req).await;
            if resp.status() == StatusCode::OK {
                snapshot = Some(test::read_body_json::<Value, _>(resp).await);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let snapshot = snapshot.expect("analysis was never created");
        assert_eq!(snapshot["RID"], "rid-42");
        assert_eq!(snapshot["status"], "running");
        assert_eq!(snapshot["repositoryURL"], "https://github.com/org/repo.git");

        let req = test::TestRequest::post()
            .uri("/analysis")
            .set_json(json!({
                "repositoryURL": "https://github.com/org/repo.git",
                "repositoryBranch": "main"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["result"], "conflict");

        assert!(store.find_repository("https://github.com/org/repo.git", "main").await.is_ok());
    }

    #[actix_web::test]
    async fn invalid_analysis_requests_are_rejected() {
        let (_, state) = state().await;
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/analysis")
            .set_json(json!({"repositoryURL": "https://github.com/org/repo", "repositoryBranch": "main"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"result": "error", "details": "This is not a valid repository URL."}));

        let req = test::TestRequest::post()
            .uri("/analysis")
            .set_json(json!({"repositoryURL": "https://github.com/org/repo.git", "repositoryBranch": "a b"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/analysis")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["result"], "error");
    }

    #[actix_web::test]
    async fn unknown_analysis_is_not_found() {
        let (_, state) = state().await;
        let app = app!(state);

        let req = test::TestRequest::get().uri("/analysis/missing").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"result": "error", "details": "Analysis not found."}));
    }

    #[actix_web::test]
    async fn security_tests_are_created_once() {
        let (store, state) = state().await;
        let app = app!(state);

        let brakeman = json!({
            "name": "brakeman",
            "image": "huskyci/brakeman",
            "cmd": "brakeman -f json",
            "language": "Ruby",
            "default": true
        });

        let req = test::TestRequest::post().uri("/securitytest").set_json(&brakeman).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(store.find_security_test("brakeman").await.unwrap().language, "Ruby");

        let req = test::TestRequest::post().uri("/securitytest").set_json(&brakeman).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // the built-in catalog entries count as existing
        let req = test::TestRequest::post()
            .uri("/securitytest")
            .set_json(json!({"name": "enry", "image": "other/enry", "cmd": "enry"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn repositories_are_created_once() {
        let (_, state) = state().await;
        let app = app!(state);

        let repo = json!({
            "repositoryURL": "git@github.com:org/repo.git",
            "repositoryBranch": "develop"
        });
        let req = test::TestRequest::post().uri("/repository").set_json(&repo).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post().uri("/repository").set_json(&repo).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/repository")
            .set_json(json!({"repositoryURL": "not a url", "repositoryBranch": "main"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
