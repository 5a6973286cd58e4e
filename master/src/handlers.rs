use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use common::{Job, UserProgram};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::pool::WorkerStatus;
use crate::state::AppState;

/// Router HTTP de administración. Sólo lectura: los jobs se mandan por el
/// protocolo binario.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/jobs", get(list_jobs))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/programs/:id", get(get_program))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerStatus>> {
    Json(state.pool.snapshot())
}

// Jobs que siguen en la tabla viva
async fn list_jobs(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.tracker.live_jobs())
}

// Primero la tabla viva (los reportes se persisten recién en el tick), después
// el registro durable para jobs que ya salieron
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, StatusCode> {
    if let Some(job) = state.tracker.snapshot(&id) {
        return Ok(Json(job));
    }
    match state.tracker.get_job(&id) {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("leyendo job {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_program(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserProgram>, StatusCode> {
    match state.programs.load(&id) {
        Ok(Some(program)) => Ok(Json(program)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("leyendo programa {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use crate::store::JobStore;
    use axum::{body::Body, http::Request};
    use common::{JobContext, WorkerAddress};
    use tower::ServiceExt;

    async fn get_path(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn health_responde_ok() {
        let (state, _rx) = test_state("http_health", vec![]);
        let (status, body) = get_path(build_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn workers_lista_el_pool() {
        let (state, _rx) = test_state("http_workers", vec![WorkerAddress::new("a", 7000)]);
        let (status, body) = get_path(build_router(state), "/api/v1/workers").await;
        assert_eq!(status, StatusCode::OK);

        let workers: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(workers[0]["address"], "a:7000");
        assert_eq!(workers[0]["healthy"], false);
    }

    #[tokio::test]
    async fn job_inexistente_es_404() {
        let (state, _rx) = test_state("http_job_404", vec![]);
        let (status, _) = get_path(build_router(state), "/api/v1/jobs/nada").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn job_guardado_se_devuelve() {
        let (state, _rx) = test_state("http_job", vec![]);
        state
            .store
            .write(&Job::new("job-1", "job-1", JobContext::new("/in", vec![])))
            .unwrap();
        let (status, body) = get_path(build_router(state), "/api/v1/jobs/job-1").await;
        assert_eq!(status, StatusCode::OK);

        let job: Job = serde_json::from_slice(&body).unwrap();
        assert_eq!(job.context.file, "/in");
    }

    #[tokio::test]
    async fn programa_guardado_se_devuelve() {
        let (state, _rx) = test_state("http_program", vec![]);
        let program = UserProgram {
            id: "p1".into(),
            content: "{}".into(),
        };
        state.programs.save(&program).unwrap();

        let app = build_router(state);
        let (status, body) = get_path(app.clone(), "/api/v1/programs/p1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<UserProgram>(&body).unwrap(), program);

        let (status, _) = get_path(app, "/api/v1/programs/otro").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
