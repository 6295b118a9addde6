//! 域名过滤：规则类型与规则文件模式

pub mod engine;
pub mod trie;

pub use engine::{CheckResult, FilterEngine};

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::dns;

/// 过滤动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Block,
    Redirect,
    Log,
}

/// 编译后的过滤规则
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub id: String,
    pub priority: i32,
    pub enabled: bool,
    pub action: Action,
    pub domains: Vec<String>,
    /// 查询类型集合，空表示匹配所有类型
    pub query_types: Vec<u16>,
    pub redirect_ip: Option<IpAddr>,
    pub redirect_ttl: u32,
    pub description: String,
}

impl Rule {
    /// 规则是否接受该查询类型
    pub fn matches_qtype(&self, qtype: u16) -> bool {
        if self.query_types.is_empty() {
            return true;
        }
        self.query_types
            .iter()
            .any(|&t| t == qtype || t == dns::TYPE_ANY)
    }

    /// 规则的模式列表是否匹配该域名
    pub fn matches_domain(&self, domain: &str) -> bool {
        self.domains.iter().any(|p| match_pattern(domain, p))
    }
}

/// 匹配单个域名模式。`*.X` 同时匹配 `X` 本身。
pub fn match_pattern(domain: &str, pattern: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let domain = domain.to_lowercase();

    if pattern == "*" {
        return true;
    }

    if let Some(suffix) = pattern.strip_prefix("*.") {
        return domain.ends_with(&pattern[1..]) || domain == suffix;
    }

    domain == pattern
}

// ============== 规则文件 (YAML) ==============

#[derive(Debug, Deserialize)]
pub struct RuleSetFile {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RuleConfig {
    pub id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub query_types: Vec<String>,
    #[serde(default)]
    pub redirect_ip: Option<String>,
    #[serde(default)]
    pub redirect_ttl: u32,
    #[serde(default)]
    pub description: String,
}

fn default_enabled() -> bool {
    true
}

impl RuleConfig {
    /// 编译为运行时规则。未知动作回落为 Allow，未知查询类型
    /// token 静默丢弃，TTL 为 0 时取默认 300 秒。
    pub fn compile(self) -> Rule {
        let action = match self.action.to_lowercase().as_str() {
            "block" => Action::Block,
            "redirect" => Action::Redirect,
            "log" => Action::Log,
            _ => Action::Allow,
        };

        let redirect_ip = self.redirect_ip.as_deref().and_then(|s| {
            s.parse::<IpAddr>()
                .map_err(|e| log::warn!("rule {}: invalid redirect_ip {:?}: {}", self.id, s, e))
                .ok()
        });

        let query_types = self
            .query_types
            .iter()
            .filter_map(|t| dns::type_from_token(t))
            .collect();

        let redirect_ttl = if self.redirect_ttl == 0 {
            300
        } else {
            self.redirect_ttl
        };

        Rule {
            id: self.id,
            priority: self.priority,
            enabled: self.enabled,
            action,
            domains: self.domains,
            query_types,
            redirect_ip,
            redirect_ttl,
            description: self.description,
        }
    }
}
