//! API route definitions

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};

use super::shared::{CommandError, SharedStateHandle};
use super::types::*;
use crate::error::ConfigError;
use crate::pipeline::{ManagerCommand, PipelineCommand};
use crate::telemetry::PipelineMetrics;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

/// Create the API router with all endpoints
pub fn create_router(state: SharedStateHandle) -> Router {
    Router::new()
        // Status endpoints
        .route("/api/status", get(status_handler))
        .route("/api/stats", get(stats_handler))
        // Frame endpoints
        .route("/api/frame", get(frame_handler))
        .route("/api/frame/preview", get(preview_handler))
        // Input and universe endpoints
        .route("/api/inputs", get(inputs_handler))
        .route("/api/universes", get(universes_handler))
        // Effect endpoints
        .route("/api/effects", get(list_effects))
        .route("/api/effects/select", post(select_effect))
        .route("/api/effects/reset", post(reset_effect))
        // Manual overrides
        .route("/api/overrides", delete(clear_overrides))
        .route("/api/overrides/:input", put(set_override))
        // Settings
        .route("/api/settings/reload", post(reload_settings))
        // WebSocket endpoint for real-time updates
        .route("/ws", get(super::websocket::ws_handler))
        .with_state(state)
}

fn command_error(err: CommandError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        CommandError::Unavailable | CommandError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        CommandError::Rejected(ConfigError::UnknownEffect(_) | ConfigError::UnknownInput { .. }) => {
            StatusCode::NOT_FOUND
        }
        CommandError::Rejected(_) => StatusCode::BAD_REQUEST,
    };
    (status, Json(ApiError::new(err.to_string())))
}

// ============================================================================
// Status Handlers
// ============================================================================

async fn status_handler(State(state): State<SharedStateHandle>) -> Json<StatusResponse> {
    let snapshot = state.get_snapshot();
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        tick: snapshot.tick,
        width: snapshot.width,
        height: snapshot.height,
        active_effect: snapshot.active_effect.clone(),
        state: snapshot.effect_status.as_ref().map(|s| s.state),
        source: snapshot.source,
        fps: snapshot.metrics.fps,
        target_fps: snapshot.metrics.target_fps,
    })
}

async fn stats_handler(State(state): State<SharedStateHandle>) -> Json<PipelineMetrics> {
    Json(state.get_snapshot().metrics.clone())
}

// ============================================================================
// Frame Handlers
// ============================================================================

async fn frame_handler(State(state): State<SharedStateHandle>) -> Json<FrameResponse> {
    Json(FrameResponse::from(state.get_snapshot().as_ref()))
}

async fn preview_handler(State(state): State<SharedStateHandle>) -> Json<PreviewResponse> {
    let snapshot = state.get_snapshot();
    Json(PreviewResponse {
        tick: snapshot.tick,
        width: snapshot.width,
        height: snapshot.height,
        rows: snapshot.frame.to_rgb_preview(),
    })
}

// ============================================================================
// Input / Universe Handlers
// ============================================================================

async fn inputs_handler(State(state): State<SharedStateHandle>) -> Json<InputsResponse> {
    let snapshot = state.get_snapshot();
    Json(InputsResponse {
        effect: snapshot.active_effect.clone(),
        inputs: snapshot.inputs.clone(),
        overrides: snapshot.overrides.clone(),
    })
}

async fn universes_handler(State(state): State<SharedStateHandle>) -> Json<UniversesResponse> {
    let snapshot = state.get_snapshot();
    Json(UniversesResponse {
        inputs: snapshot.universes.clone(),
        outputs: snapshot.outputs.as_ref().clone(),
    })
}

// ============================================================================
// Effect Handlers
// ============================================================================

async fn list_effects(State(state): State<SharedStateHandle>) -> Json<EffectsResponse> {
    let snapshot = state.get_snapshot();
    Json(EffectsResponse {
        active: snapshot.active_effect.clone(),
        status: snapshot.effect_status.clone(),
        effects: snapshot.effects.as_ref().clone(),
    })
}

async fn select_effect(
    State(state): State<SharedStateHandle>,
    Json(req): Json<SelectEffectRequest>,
) -> ApiResult<MessageResponse> {
    state
        .request(ManagerCommand::Select(req.effect.clone()))
        .await
        .map_err(command_error)?;
    Ok(Json(MessageResponse::new(format!("Selected {}", req.effect))))
}

async fn reset_effect(State(state): State<SharedStateHandle>) -> ApiResult<MessageResponse> {
    state.request(ManagerCommand::Reset).await.map_err(command_error)?;
    Ok(Json(MessageResponse::new("Effect reset")))
}

// ============================================================================
// Override Handlers
// ============================================================================

async fn set_override(
    State(state): State<SharedStateHandle>,
    Path(input): Path<String>,
    Json(req): Json<OverrideRequest>,
) -> ApiResult<MessageResponse> {
    state
        .request(ManagerCommand::SetOverride {
            input: input.clone(),
            value: req.value,
        })
        .await
        .map_err(command_error)?;
    Ok(Json(MessageResponse::new(format!("Input {} pinned", input))))
}

async fn clear_overrides(State(state): State<SharedStateHandle>) -> ApiResult<MessageResponse> {
    state
        .request(ManagerCommand::ClearOverrides)
        .await
        .map_err(command_error)?;
    Ok(Json(MessageResponse::new("Overrides cleared")))
}

// ============================================================================
// Settings Handlers
// ============================================================================

async fn reload_settings(
    State(state): State<SharedStateHandle>,
) -> Result<(StatusCode, Json<MessageResponse>), (StatusCode, Json<ApiError>)> {
    state
        .send_command(PipelineCommand::ReloadSettings)
        .map_err(command_error)?;
    Ok((StatusCode::ACCEPTED, Json(MessageResponse::new("Reload requested"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::server::create_shared_state;
    use crate::frame::{PixelFrame, Rgbw};
    use crate::pipeline::{PreviewSnapshot, Publisher};
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tower::ServiceExt;

    fn test_state() -> (SharedStateHandle, UnboundedReceiver<PipelineCommand>) {
        let publisher = Publisher::new();
        let mut snapshot = PreviewSnapshot::empty(2, 1);
        snapshot.tick = 5;
        snapshot.active_effect = Some("single_color".into());
        snapshot.frame = PixelFrame::filled(2, 1, Rgbw::new(0, 0, 0, 255));
        publisher.publish(snapshot);
        create_shared_state(publisher)
    }

    /// Answers manager commands like the compute thread would
    fn spawn_responder(mut rx: UnboundedReceiver<PipelineCommand>) {
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                if let PipelineCommand::Manager { command, reply } = command {
                    let outcome = match command {
                        ManagerCommand::Select(name) if name != "gradient" => {
                            Err(ConfigError::UnknownEffect(name))
                        }
                        _ => Ok(()),
                    };
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
            }
        });
    }

    async fn call(router: Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_status_reads_snapshot() {
        let (state, _rx) = test_state();
        let (status, json) = call(create_router(state), "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["tick"], 5);
        assert_eq!(json["active_effect"], "single_color");
    }

    #[tokio::test]
    async fn test_frame_and_preview() {
        let (state, _rx) = test_state();
        let (status, json) = call(create_router(state.clone()), "GET", "/api/frame", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["pixels"][1], serde_json::json!([0, 0, 0, 255]));

        let (status, json) = call(create_router(state), "GET", "/api/frame/preview", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["rows"][0][0], serde_json::json!([255, 209, 163]));
    }

    #[tokio::test]
    async fn test_select_effect() {
        let (state, rx) = test_state();
        spawn_responder(rx);

        let body = serde_json::json!({ "effect": "gradient" });
        let (status, _) = call(create_router(state.clone()), "POST", "/api/effects/select", Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let body = serde_json::json!({ "effect": "nope" });
        let (status, json) = call(create_router(state), "POST", "/api/effects/select", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "unknown effect 'nope'");
    }

    #[tokio::test]
    async fn test_set_and_clear_override() {
        let (state, rx) = test_state();
        spawn_responder(rx);

        let body = serde_json::json!({ "value": { "type": "fraction", "value": 0.5 } });
        let (status, _) = call(create_router(state.clone()), "PUT", "/api/overrides/master", Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(create_router(state), "DELETE", "/api/overrides", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reload_queues_command() {
        let (state, mut rx) = test_state();
        let (status, _) = call(create_router(state), "POST", "/api/settings/reload", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(matches!(rx.try_recv(), Ok(PipelineCommand::ReloadSettings)));
    }

    #[tokio::test]
    async fn test_commands_without_pipeline_are_unavailable() {
        let (state, rx) = test_state();
        drop(rx);
        let (status, _) = call(create_router(state), "POST", "/api/effects/reset", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
