//! /calculate-move and /analyze-game handlers.
//!
//! Both block until the work is done. Invalid input and failed tasks are
//! 400 with the error text as body.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use hexdist_core::task::{AnalyzeGameInput, CalculateMoveInput, JobResult, WorkerTask};
use hexdist_services::{MoveAnalysis, SchedulerError};

use super::ApiState;

type ApiError = (StatusCode, String);

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, message.into())
}

fn rejected(rejection: JsonRejection) -> ApiError {
    tracing::warn!(error = %rejection.body_text(), "invalid request body");
    bad_request(rejection.body_text())
}

fn scheduler_error(e: SchedulerError) -> ApiError {
    match e {
        SchedulerError::Task(message) => bad_request(message),
        other => {
            tracing::error!(error = %other, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ── /calculate-move (POST) ───────────────────────────────────────────────────

pub async fn handle_calculate_move(
    State(state): State<ApiState>,
    body: Result<Json<CalculateMoveInput>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(input) = body.map_err(rejected)?;
    input.validate().map_err(|e| bad_request(e.to_string()))?;

    tracing::info!(size = input.game.size, "move requested");
    let watch = state
        .queue
        .enqueue_watched(WorkerTask::CalculateMove(input))
        .await
        .map_err(scheduler_error)?;
    let id = watch.id;

    match watch.finished().await.map_err(scheduler_error)? {
        JobResult::Success(data) => Ok(Json(data)),
        JobResult::Failure(error) => {
            tracing::warn!(job = %id, %error, "move calculation failed");
            Err(bad_request(error))
        }
    }
}

// ── /analyze-game (POST) ─────────────────────────────────────────────────────

pub async fn handle_analyze_game(
    State(state): State<ApiState>,
    body: Result<Json<AnalyzeGameInput>, JsonRejection>,
) -> Result<Json<Vec<MoveAnalysis>>, ApiError> {
    let Json(input) = body.map_err(rejected)?;
    input.validate().map_err(|e| bad_request(e.to_string()))?;

    tracing::info!(size = input.size, moves = input.moves().count(), "game analysis requested");
    tracing::debug!(moves_history = %input.moves_history, "game analysis input");

    let slots = state.composite.submit(&input).await.map_err(scheduler_error)?;
    Ok(Json(slots))
}
