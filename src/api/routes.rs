//! API 路由定义

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;

use crate::filter::FilterEngine;

use super::handlers;

/// 应用状态
pub struct AppState {
    pub engine: Arc<FilterEngine>,
    pub rules_path: String,
    pub start_time: Instant,
}

/// 创建 API 路由。metrics_path 来自配置。
pub fn create_router(state: Arc<AppState>, metrics_path: &str) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(handlers::health))
        // Metrics
        .route(metrics_path, get(handlers::metrics))
        // 计数器快照
        .route("/stats", get(handlers::stats))
        // 规则
        .route("/rules", get(handlers::get_rules))
        .route("/rules/reload", post(handlers::reload_rules))
        .route("/rules/:id/enable", post(handlers::enable_rule))
        .route("/rules/:id/disable", post(handlers::disable_rule))
        .with_state(state)
}
