use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::scanner::{self, Bot};
use crate::state::{AppState, BotPhase};

pub fn router(state: AppState, bot: Arc<Bot>) -> Router {
    Router::new()
        .route("/start", post(start_bot))
        .route("/stop", post(stop_bot))
        .route("/pause", post(pause_bot))
        .route("/status", get(get_status))
        .route("/interactions", get(get_interactions))
        .route("/screenshot", get(get_screenshot))
        .with_state(ApiState { app: state, bot })
}

#[derive(Clone)]
struct ApiState {
    app: AppState,
    bot: Arc<Bot>,
}

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if let Some(token) = auth.strip_prefix("Bearer ")
        && token == expected_token
    {
        return Ok(());
    }

    Err(StatusCode::UNAUTHORIZED)
}

async fn start_bot(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let mut state = api.app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    match state.phase {
        BotPhase::Paused => {
            state.phase = BotPhase::Running;
            state.pause_notify.notify_one();
            Ok(Json(json!({"status": "resumed"})))
        }
        BotPhase::Idle => {
            if let Some(handle) = state.run_handle.take() {
                handle.abort();
            }

            state.interactions.clear();
            state.current_profile = None;
            // Set before spawning so a second /start cannot slip in.
            state.phase = BotPhase::Running;

            let app_state = api.app.clone();
            let bot = api.bot.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = scanner::run_session(app_state.clone(), bot).await {
                    tracing::error!("bot error: {e:#}");
                    let mut state = app_state.lock().await;
                    state.phase = BotPhase::Idle;
                }
            });

            state.run_handle = Some(handle);
            Ok(Json(json!({"status": "started"})))
        }
        BotPhase::Running => Err(StatusCode::CONFLICT),
    }
}

async fn stop_bot(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let mut state = api.app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    if let Some(handle) = state.run_handle.take() {
        handle.abort();
    }

    // Wake any paused waiter so it can exit
    state.pause_notify.notify_one();
    state.phase = BotPhase::Idle;
    state.current_profile = None;

    Ok(Json(json!({"status": "stopped"})))
}

async fn pause_bot(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let mut state = api.app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    match state.phase {
        BotPhase::Running | BotPhase::Paused => {
            state.phase = BotPhase::Paused;
            Ok(Json(json!({"status": "paused"})))
        }
        BotPhase::Idle => Err(StatusCode::CONFLICT),
    }
}

#[derive(Serialize)]
struct StatusResponse {
    phase: BotPhase,
    running: bool,
    paused: bool,
    current_profile: Option<String>,
    profiles_processed: u32,
    messages_sent: usize,
}

async fn get_status(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let state = api.app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    Ok(Json(StatusResponse {
        phase: state.phase,
        running: state.phase == BotPhase::Running,
        paused: state.phase == BotPhase::Paused,
        current_profile: state.current_profile.clone(),
        profiles_processed: state.profiles_processed,
        messages_sent: state.messages_sent(),
    }))
}

async fn get_interactions(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let state = api.app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    Ok(Json(state.interactions.clone()))
}

async fn get_screenshot(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    {
        let state = api.app.lock().await;
        check_auth(&headers, &state.config.auth_token)?;
    }

    let png = api.bot.bridge().capture().await.map_err(|e| {
        tracing::error!("screenshot failed: {e}");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_owned()),
            (header::CONTENT_DISPOSITION, "inline; filename=\"screenshot.png\"".to_owned()),
        ],
        png,
    ))
}
