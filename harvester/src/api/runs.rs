use log::{error, info};
use rocket::serde::json::Json;
use rocket::{get, post, State};

use crate::models::{
    AdminToken, CredentialStatus, ErrorResponse, RunRequest, RunStartedResponse, RunSummary,
    TrendingExportResponse,
};
use crate::AppState;

#[get("/latest")]
pub async fn latest_run(state: &State<AppState>) -> Json<Option<RunSummary>> {
    Json(state.harvester.last_run().await)
}

#[post("/", data = "<run_request>")]
pub async fn start_run(
    _token: AdminToken,
    run_request: Json<RunRequest>,
    state: &State<AppState>,
) -> Result<Json<RunStartedResponse>, ErrorResponse> {
    let mode = run_request.mode;
    if state.harvester.try_start(mode) {
        info!("Started {mode:?} update on request");
        Ok(Json(RunStartedResponse {
            success: true,
            message: format!("{mode:?} update started"),
        }))
    } else {
        Err(ErrorResponse {
            error: "run_in_progress".to_string(),
            message: "An update is already running".to_string(),
        })
    }
}

#[get("/credentials")]
pub async fn credentials(_token: AdminToken, state: &State<AppState>) -> Json<CredentialStatus> {
    Json(CredentialStatus {
        available: state.harvester.credentials_available(),
    })
}

#[post("/trending")]
pub async fn save_trending(
    _token: AdminToken,
    state: &State<AppState>,
) -> Json<TrendingExportResponse> {
    match state.harvester.save_trending().await {
        Ok(path) => Json(TrendingExportResponse {
            success: true,
            message: "Trending videos saved".to_string(),
            path: Some(path.display().to_string()),
        }),
        Err(e) => {
            error!("Failed to save trending videos: {e:#}");
            Json(TrendingExportResponse {
                success: false,
                message: format!("Failed to save trending videos: {e}"),
                path: None,
            })
        }
    }
}
