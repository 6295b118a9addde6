//! Prometheus metrics 模块

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// 全局 metrics registry
static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

lazy_static::lazy_static! {
    /// 收到的报文总数
    pub static ref PACKETS_RECEIVED: IntCounter = IntCounter::new(
        "xdns_packets_received",
        "Total packets received from RX rings"
    ).unwrap();

    /// 放行的报文数
    pub static ref PACKETS_ALLOWED: IntCounter = IntCounter::new(
        "xdns_packets_allowed",
        "Packets allowed through"
    ).unwrap();

    /// 阻断的报文数
    pub static ref PACKETS_BLOCKED: IntCounter = IntCounter::new(
        "xdns_packets_blocked",
        "Packets answered with NXDOMAIN/REFUSED"
    ).unwrap();

    /// 重定向的报文数
    pub static ref PACKETS_REDIRECTED: IntCounter = IntCounter::new(
        "xdns_packets_redirected",
        "Packets answered with a configured address"
    ).unwrap();

    /// 丢弃的报文数（非 DNS、畸形、缓冲不足等）
    pub static ref PACKETS_DROPPED: IntCounter = IntCounter::new(
        "xdns_packets_dropped",
        "Packets dropped back to the fill ring"
    ).unwrap();

    /// DNS 解析失败数
    pub static ref PARSE_ERRORS: IntCounter = IntCounter::new(
        "xdns_parse_errors",
        "DNS messages that failed to parse"
    ).unwrap();

    /// TX 环满导致放弃的响应数
    pub static ref TX_DROPS: IntCounter = IntCounter::new(
        "xdns_tx_drops",
        "Responses abandoned because the TX ring was full"
    ).unwrap();

    /// 当前加载的规则数
    pub static ref RULES_TOTAL: IntGauge = IntGauge::new(
        "xdns_rules_total",
        "Rules currently loaded"
    ).unwrap();

    /// 单包处理延迟
    pub static ref PROCESSING_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "xdns_processing_latency_seconds",
            "Per-packet processing latency"
        )
        .buckets(prometheus::exponential_buckets(1e-7, 4.0, 12).unwrap())
    ).unwrap();

    /// 运行时间（秒）
    pub static ref UPTIME_SECONDS: IntGauge = IntGauge::new(
        "xdns_uptime_seconds",
        "Daemon uptime in seconds"
    ).unwrap();
}

/// 注册所有 metrics
pub fn register_metrics() {
    let r = registry();

    r.register(Box::new(PACKETS_RECEIVED.clone())).ok();
    r.register(Box::new(PACKETS_ALLOWED.clone())).ok();
    r.register(Box::new(PACKETS_BLOCKED.clone())).ok();
    r.register(Box::new(PACKETS_REDIRECTED.clone())).ok();
    r.register(Box::new(PACKETS_DROPPED.clone())).ok();
    r.register(Box::new(PARSE_ERRORS.clone())).ok();
    r.register(Box::new(TX_DROPS.clone())).ok();
    r.register(Box::new(RULES_TOTAL.clone())).ok();
    r.register(Box::new(PROCESSING_LATENCY.clone())).ok();
    r.register(Box::new(UPTIME_SECONDS.clone())).ok();
}

/// 导出 Prometheus 文本格式
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// 更新 uptime
pub fn update_uptime(start_time: std::time::Instant) {
    UPTIME_SECONDS.set(start_time.elapsed().as_secs() as i64);
}
