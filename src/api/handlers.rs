//! API 请求处理器

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::filter::engine::EngineStats;
use crate::filter::Rule;
use crate::metrics;

use super::routes::AppState;

// ============== 响应类型 ==============

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn ok_message(msg: &str) -> Self {
        ApiResponse {
            success: true,
            data: None,
            message: Some(msg.to_string()),
        }
    }

    pub fn error(msg: &str) -> Self {
        ApiResponse {
            success: false,
            data: None,
            message: Some(msg.to_string()),
        }
    }
}

// ============== 健康检查 ==============

pub async fn health() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("ok"))
}

// ============== Metrics ==============

pub async fn metrics() -> String {
    metrics::export_metrics()
}

// ============== 计数器快照 ==============

#[derive(Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub packets_received: u64,
    pub packets_allowed: u64,
    pub packets_blocked: u64,
    pub packets_redirected: u64,
    pub packets_dropped: u64,
    pub parse_errors: u64,
    pub tx_drops: u64,
    pub rules_total: usize,
    pub engine: EngineStats,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        packets_received: metrics::PACKETS_RECEIVED.get(),
        packets_allowed: metrics::PACKETS_ALLOWED.get(),
        packets_blocked: metrics::PACKETS_BLOCKED.get(),
        packets_redirected: metrics::PACKETS_REDIRECTED.get(),
        packets_dropped: metrics::PACKETS_DROPPED.get(),
        parse_errors: metrics::PARSE_ERRORS.get(),
        tx_drops: metrics::TX_DROPS.get(),
        rules_total: state.engine.rule_count(),
        engine: state.engine.stats(),
    })
}

// ============== 规则 ==============

pub async fn get_rules(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<Rule>>> {
    Json(ApiResponse::success(state.engine.rules()))
}

pub async fn reload_rules(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<usize>>, (StatusCode, Json<ApiResponse<()>>)> {
    match state.engine.load_file(&state.rules_path) {
        Ok(count) => {
            metrics::RULES_TOTAL.set(count as i64);
            log::info!("reloaded {} rules from {}", count, state.rules_path);
            Ok(Json(ApiResponse::success(count)))
        }
        Err(e) => {
            log::error!("rule reload failed: {:#}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(&format!("reload failed: {}", e))),
            ))
        }
    }
}

pub async fn enable_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, (StatusCode, Json<ApiResponse<()>>)> {
    set_enabled(&state, &id, true)
}

pub async fn disable_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, (StatusCode, Json<ApiResponse<()>>)> {
    set_enabled(&state, &id, false)
}

fn set_enabled(
    state: &AppState,
    id: &str,
    enabled: bool,
) -> Result<Json<ApiResponse<()>>, (StatusCode, Json<ApiResponse<()>>)> {
    if state.engine.set_enabled(id, enabled) {
        Ok(Json(ApiResponse::ok_message(if enabled {
            "rule enabled"
        } else {
            "rule disabled"
        })))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(&format!("rule {} not found", id))),
        ))
    }
}
