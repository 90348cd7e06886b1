//! HTTP request handlers
//!
//! `POST /rpc` always answers 200 with an [`RpcResponse`]; failures are
//! reported through `success: false` and the error message.

use crate::api::server::AppContext;
use crate::error::{Error, Result};
use crate::playback::{Controller, ControllerStatus};
use axum::{extract::State, Json};
use herald_common::rpc::{
    Command, RpcResponse, METHOD_ENABLE, METHOD_PAUSE, METHOD_RESET, METHOD_RESUME,
    METHOD_SET_PLAY_BILL, METHOD_SET_VOLUME, METHOD_START, METHOD_STOP, METHOD_TEMP_PLAY,
    METHOD_TEMP_PLAY_INNER,
};
use herald_common::{Bill, MusicFile};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Level used when a temporary request names none
const DEFAULT_TEMP_LEVEL: i64 = 1;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
    build_timestamp: String,
}

// ============================================================================
// Health & Status
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "herald-ap".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
    })
}

/// GET /status
pub async fn status(State(ctx): State<AppContext>) -> Json<ControllerStatus> {
    Json(ctx.controller.status().await)
}

// ============================================================================
// Command Dispatch
// ============================================================================

/// POST /rpc
pub async fn rpc(State(ctx): State<AppContext>, body: String) -> Json<RpcResponse> {
    let command = match Command::parse(&body) {
        Ok(command) => command,
        Err(e) => {
            warn!("Rejected command: {}", e);
            return Json(RpcResponse::fail(e.to_string()));
        }
    };

    info!(method = %command.method, "Command received");
    match dispatch(&ctx.controller, &command).await {
        Ok(()) => {
            debug!("Command {} succeeded", command.method);
            Json(RpcResponse::ok())
        }
        Err(e) => {
            warn!("Command {} failed: {}", command.method, e);
            Json(RpcResponse::fail(e.to_string()))
        }
    }
}

async fn dispatch(controller: &Controller, command: &Command) -> Result<()> {
    match command.method.as_str() {
        METHOD_SET_PLAY_BILL => {
            let bill = Bill::from_value(command.params_value())?;
            controller.set_bill(bill, true).await
        }
        METHOD_START => controller.start().await,
        METHOD_STOP => controller.stop().await,
        METHOD_ENABLE => {
            let value = command.require_int("value")?;
            controller.set_enable(value >= 1).await
        }
        METHOD_PAUSE => controller.pause().await,
        METHOD_RESUME => controller.resume().await,
        METHOD_RESET => controller.reset().await,
        METHOD_SET_VOLUME => {
            let value = command.require_int("value")?;
            controller.set_volume(value).await
        }
        METHOD_TEMP_PLAY => {
            let file = temp_file(command);
            let level = command.int_param("level").unwrap_or(DEFAULT_TEMP_LEVEL);
            controller
                .play_temp(file, level, seconds_param(command, "timeLen"))
                .await
        }
        METHOD_TEMP_PLAY_INNER => {
            let index = command.require_int("index")?;
            let level = command.int_param("level").unwrap_or(DEFAULT_TEMP_LEVEL);
            controller
                .play_inner(level, index, seconds_param(command, "delay"))
                .await
        }
        other => Err(Error::BadRequest(format!("unknown method '{}'", other))),
    }
}

/// File described by `tempPlay` params
fn temp_file(command: &Command) -> MusicFile {
    let id = match command.params.get("fId") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    MusicFile {
        id,
        name: command.str_param("fName").unwrap_or_default().to_string(),
        play_times: command
            .int_param("playTimes")
            .and_then(|n| i32::try_from(n).ok())
            .unwrap_or(1),
        url: command.str_param("url").map(str::to_string),
        ..Default::default()
    }
}

/// Positive seconds parameter as a duration limit
fn seconds_param(command: &Command, key: &str) -> Option<Duration> {
    command
        .int_param(key)
        .filter(|secs| *secs > 0)
        .map(|secs| Duration::from_secs(secs as u64))
}
