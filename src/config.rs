//! 配置管理模块

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 主配置结构
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// 网卡名
    pub interface: String,
    /// 起始队列号
    #[serde(default)]
    pub queue_id: u32,
    /// 队列数量
    #[serde(default = "default_queue_count")]
    pub queue_count: u32,
    /// 协作方 BPF 程序对象路径
    pub bpf_path: String,
    #[serde(default)]
    pub xdp: XdpConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    /// 过滤规则文件路径
    #[serde(default = "default_rules_path")]
    pub rules_path: String,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 限速配置（仅占位，当前版本不生效）
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// AF_XDP socket 配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct XdpConfig {
    #[serde(default = "default_num_frames")]
    pub num_frames: u32,
    #[serde(default = "default_frame_size")]
    pub frame_size: u32,
    #[serde(default = "default_ring_size")]
    pub fill_ring_size: u32,
    #[serde(default = "default_ring_size")]
    pub comp_ring_size: u32,
    #[serde(default = "default_ring_size")]
    pub rx_ring_size: u32,
    #[serde(default = "default_ring_size")]
    pub tx_ring_size: u32,
    /// XDP 挂载模式
    #[serde(default)]
    pub mode: XdpMode,
}

/// XDP 挂载模式
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum XdpMode {
    #[default]
    Default,
    Skb,    // Generic XDP (fallback)
    Driver, // Native XDP
    Hw,     // Hardware offload
}

/// Worker 配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Worker 数量，0 表示每个队列一个
    #[serde(default)]
    pub num_workers: u32,
    /// 批处理大小
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// 是否按队列号绑定 CPU
    #[serde(default = "default_pin_workers")]
    pub pin_workers: bool,
}

/// DNS 配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsConfig {
    /// 监听端口集合，同步给转向程序
    #[serde(default = "default_listen_ports")]
    pub listen_ports: Vec<u16>,
}

/// 监控配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// 限速配置占位
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub queries_per_second: u32,
}

fn default_queue_count() -> u32 {
    1
}
fn default_num_frames() -> u32 {
    4096
}
fn default_frame_size() -> u32 {
    2048
}
fn default_ring_size() -> u32 {
    2048
}
fn default_batch_size() -> u32 {
    64
}
fn default_pin_workers() -> bool {
    true
}
fn default_listen_ports() -> Vec<u16> {
    vec![53]
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_listen() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_metrics_path() -> String {
    "/metrics".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_rules_path() -> String {
    "configs/rules.yaml".to_string()
}

impl Default for XdpConfig {
    fn default() -> Self {
        Self {
            num_frames: default_num_frames(),
            frame_size: default_frame_size(),
            fill_ring_size: default_ring_size(),
            comp_ring_size: default_ring_size(),
            rx_ring_size: default_ring_size(),
            tx_ring_size: default_ring_size(),
            mode: XdpMode::Default,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            batch_size: default_batch_size(),
            pin_workers: default_pin_workers(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_ports: default_listen_ports(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
            path: default_metrics_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;

        let config: Config =
            serde_yaml::from_str(&content).context("failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            anyhow::bail!("interface is required");
        }
        if self.bpf_path.is_empty() {
            anyhow::bail!("bpf_path is required");
        }
        if self.queue_count == 0 {
            anyhow::bail!("queue_count must be at least 1");
        }
        if self.xdp.num_frames < 64 {
            anyhow::bail!("xdp.num_frames must be at least 64");
        }
        if self.xdp.frame_size < 1024 {
            anyhow::bail!("xdp.frame_size must be at least 1024");
        }
        for (name, size) in [
            ("fill_ring_size", self.xdp.fill_ring_size),
            ("comp_ring_size", self.xdp.comp_ring_size),
            ("rx_ring_size", self.xdp.rx_ring_size),
            ("tx_ring_size", self.xdp.tx_ring_size),
        ] {
            if size == 0 || !size.is_power_of_two() {
                anyhow::bail!("xdp.{} must be a power of two", name);
            }
        }
        if self.dns.listen_ports.is_empty() {
            anyhow::bail!("at least one DNS listen port is required");
        }
        if self.workers.batch_size == 0 {
            anyhow::bail!("workers.batch_size must be positive");
        }
        Ok(())
    }

    /// 实际生效的 worker 数：0 表示每队列一个，超出队列数时收紧
    pub fn effective_workers(&self) -> u32 {
        let n = if self.workers.num_workers == 0 {
            self.queue_count
        } else {
            self.workers.num_workers
        };
        n.min(self.queue_count).max(1)
    }
}
