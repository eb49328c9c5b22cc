//! Optional HTTP control surface.
//!
//! Thin REST layer over the same [`Zapper`] handle the socket uses; handy
//! for remotes, scripts and curl.  All state mutation still happens on the
//! core loop.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use zaptv_core::{SwitchOutcome, Zapper};
use zaptv_proto::protocol::{PlayerState, PoolStats};
use zaptv_proto::state::StateManager;

#[derive(Clone)]
struct AppContext {
    zapper: Zapper,
    state: Arc<StateManager>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    zapper: Zapper,
    state: Arc<StateManager>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let ctx = AppContext { zapper, state };

        let app = Router::new()
            .route("/state", get(get_state))
            .route("/stats", get(get_stats))
            .route("/play/:index", post(play))
            .route("/up", post(up))
            .route("/down", post(down))
            .route("/stop", post(stop))
            .route("/pause", post(pause))
            .route("/resume", post(resume))
            .route("/mute", post(toggle_mute))
            .route("/volume/:value", post(set_volume))
            .layer(CorsLayer::permissive())
            .with_state(ctx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server {}: {}", addr, e);
                return;
            }
        };
        info!("HTTP API listening at http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn outcome_label(outcome: SwitchOutcome) -> &'static str {
    match outcome {
        SwitchOutcome::Instant => "instant",
        SwitchOutcome::Cold => "cold",
        SwitchOutcome::NoStream => "no-stream",
        SwitchOutcome::NoSuchChannel => "no-such-channel",
    }
}

fn switch_response(
    result: anyhow::Result<SwitchOutcome>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match result {
        Ok(outcome) => Ok(Json(serde_json::json!({
            "switch": outcome_label(outcome),
        }))),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn get_state(State(ctx): State<AppContext>) -> Json<PlayerState> {
    Json(ctx.state.get_state().await)
}

async fn get_stats(State(ctx): State<AppContext>) -> Result<Json<PoolStats>, StatusCode> {
    ctx.zapper
        .stats()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn play(
    State(ctx): State<AppContext>,
    Path(index): Path<usize>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    switch_response(ctx.zapper.play_index(index).await)
}

async fn up(State(ctx): State<AppContext>) -> Result<Json<serde_json::Value>, StatusCode> {
    switch_response(ctx.zapper.channel_up().await)
}

async fn down(State(ctx): State<AppContext>) -> Result<Json<serde_json::Value>, StatusCode> {
    switch_response(ctx.zapper.channel_down().await)
}

async fn stop(State(ctx): State<AppContext>) -> StatusCode {
    match ctx.zapper.stop().await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn pause(State(ctx): State<AppContext>) -> StatusCode {
    match ctx.zapper.pause().await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn resume(State(ctx): State<AppContext>) -> StatusCode {
    match ctx.zapper.resume().await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn toggle_mute(State(ctx): State<AppContext>) -> StatusCode {
    match ctx.zapper.toggle_mute().await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn set_volume(State(ctx): State<AppContext>, Path(value): Path<f32>) -> StatusCode {
    match ctx.zapper.set_volume(value).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
