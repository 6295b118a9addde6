//! HTTP API（监控与规则管理）

pub mod handlers;
pub mod routes;

pub use routes::{create_router, AppState};
