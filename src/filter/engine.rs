//! 过滤引擎
//!
//! 规则表与前缀树合成一个不可变快照，读侧无锁访问；任何变更都
//! 离线重建快照后原子替换，匹配延迟不受规则重载影响。

use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::Serialize;

use super::trie::DomainTrie;
use super::{Action, Rule, RuleSetFile};

/// 规则快照：规则按优先级降序排列，前缀树槽位存下标
struct RuleSnapshot {
    rules: Vec<Rule>,
    trie: DomainTrie,
}

impl RuleSnapshot {
    fn build(mut rules: Vec<Rule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut trie = DomainTrie::new();
        for (idx, rule) in rules.iter().enumerate() {
            for pattern in &rule.domains {
                trie.insert(pattern, idx);
            }
        }

        Self { rules, trie }
    }
}

/// 匹配结果
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub action: Action,
    pub rule_id: Option<String>,
    pub redirect_ip: Option<IpAddr>,
    pub redirect_ttl: u32,
}

impl CheckResult {
    fn allow() -> Self {
        Self {
            action: Action::Allow,
            rule_id: None,
            redirect_ip: None,
            redirect_ttl: 0,
        }
    }

    fn from_rule(rule: &Rule) -> Self {
        Self {
            action: rule.action,
            rule_id: Some(rule.id.clone()),
            redirect_ip: rule.redirect_ip,
            redirect_ttl: rule.redirect_ttl,
        }
    }
}

/// 引擎统计快照
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EngineStats {
    pub checks: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub redirected: u64,
    pub logged: u64,
}

#[derive(Default)]
struct Counters {
    checks: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
    redirected: AtomicU64,
    logged: AtomicU64,
}

pub struct FilterEngine {
    snapshot: ArcSwap<RuleSnapshot>,
    counters: Counters,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RuleSnapshot::build(Vec::new())),
            counters: Counters::default(),
        }
    }

    /// 从规则文件加载，整体替换现有规则。返回规则数。
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let data = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read rules file {:?}", path.as_ref()))?;
        let file: RuleSetFile =
            serde_yaml::from_str(&data).context("failed to parse rules file")?;

        let rules: Vec<Rule> = file.rules.into_iter().map(|rc| rc.compile()).collect();
        let count = rules.len();
        self.snapshot.store(Arc::new(RuleSnapshot::build(rules)));
        Ok(count)
    }

    /// 检查 (域名, 查询类型)，返回动作与命中的规则
    pub fn check(&self, domain: &str, qtype: u16) -> CheckResult {
        self.counters.checks.fetch_add(1, Ordering::Relaxed);

        let snap = self.snapshot.load();

        // 1. 前缀树查找
        if let Some(idx) = snap.trie.match_domain(domain) {
            let rule = &snap.rules[idx];
            if rule.enabled && rule.matches_qtype(qtype) {
                self.count_action(rule.action);
                return CheckResult::from_rule(rule);
            }
        }

        // 2. 按优先级扫描规则表，兜住前缀树未命中的模式组合
        for rule in &snap.rules {
            if !rule.enabled {
                continue;
            }
            if rule.matches_domain(domain) && rule.matches_qtype(qtype) {
                self.count_action(rule.action);
                return CheckResult::from_rule(rule);
            }
        }

        self.counters.allowed.fetch_add(1, Ordering::Relaxed);
        CheckResult::allow()
    }

    fn count_action(&self, action: Action) {
        let counter = match action {
            Action::Block => &self.counters.blocked,
            Action::Redirect => &self.counters.redirected,
            Action::Log => &self.counters.logged,
            Action::Allow => &self.counters.allowed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 运行时插入一条规则
    pub fn add_rule(&self, rule: Rule) {
        self.mutate(|rules| {
            rules.push(rule);
            true
        });
    }

    /// 按 ID 移除规则
    pub fn remove_rule(&self, id: &str) -> bool {
        self.mutate(|rules| {
            let before = rules.len();
            rules.retain(|r| r.id != id);
            rules.len() != before
        })
    }

    /// 启用/禁用规则
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        self.mutate(|rules| {
            let mut hit = false;
            for rule in rules.iter_mut() {
                if rule.id == id {
                    rule.enabled = enabled;
                    hit = true;
                }
            }
            hit
        })
    }

    /// 清空所有规则
    pub fn clear(&self) {
        self.snapshot
            .store(Arc::new(RuleSnapshot::build(Vec::new())));
    }

    fn mutate<F: FnOnce(&mut Vec<Rule>) -> bool>(&self, f: F) -> bool {
        let mut rules = self.snapshot.load().rules.clone();
        let changed = f(&mut rules);
        if changed {
            self.snapshot.store(Arc::new(RuleSnapshot::build(rules)));
        }
        changed
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.snapshot.load().rules.clone()
    }

    pub fn rule_count(&self) -> usize {
        self.snapshot.load().rules.len()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            checks: self.counters.checks.load(Ordering::Relaxed),
            allowed: self.counters.allowed.load(Ordering::Relaxed),
            blocked: self.counters.blocked.load(Ordering::Relaxed),
            redirected: self.counters.redirected.load(Ordering::Relaxed),
            logged: self.counters.logged.load(Ordering::Relaxed),
        }
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{TYPE_A, TYPE_AAAA};

    fn rule(id: &str, priority: i32, action: Action, domains: &[&str], qtypes: &[u16]) -> Rule {
        Rule {
            id: id.into(),
            priority,
            enabled: true,
            action,
            domains: domains.iter().map(|s| s.to_string()).collect(),
            query_types: qtypes.to_vec(),
            redirect_ip: None,
            redirect_ttl: 300,
            description: String::new(),
        }
    }

    #[test]
    fn empty_engine_allows() {
        let engine = FilterEngine::new();
        let result = engine.check("www.example.com", TYPE_A);
        assert_eq!(result.action, Action::Allow);
        assert!(result.rule_id.is_none());
        assert_eq!(engine.stats().allowed, 1);
        assert_eq!(engine.stats().checks, 1);
    }

    #[test]
    fn exact_block() {
        let engine = FilterEngine::new();
        engine.add_rule(rule("r1", 0, Action::Block, &["ads.example.com"], &[]));
        let result = engine.check("ads.example.com", TYPE_A);
        assert_eq!(result.action, Action::Block);
        assert_eq!(result.rule_id.as_deref(), Some("r1"));
        assert_eq!(engine.stats().blocked, 1);
    }

    #[test]
    fn wildcard_miss_by_qtype_allows() {
        let engine = FilterEngine::new();
        engine.add_rule(rule("r1", 0, Action::Block, &["*.ads.com"], &[TYPE_A]));
        let result = engine.check("x.ads.com", TYPE_AAAA);
        assert_eq!(result.action, Action::Allow);
        assert!(result.rule_id.is_none());
    }

    #[test]
    fn priority_orders_wildcard_candidates() {
        let engine = FilterEngine::new();
        // 两条规则都能通过扫描路径匹配，优先级高者先命中
        engine.add_rule(rule("low", 1, Action::Log, &["*"], &[]));
        engine.add_rule(rule("high", 10, Action::Block, &["*"], &[]));
        let result = engine.check("whatever.com", TYPE_A);
        assert_eq!(result.rule_id.as_deref(), Some("high"));
    }

    #[test]
    fn qtype_mismatch_falls_through_to_next_rule() {
        let engine = FilterEngine::new();
        engine.add_rule(rule("only-a", 10, Action::Block, &["*.x.com"], &[TYPE_A]));
        engine.add_rule(rule("any", 1, Action::Redirect, &["*.x.com"], &[]));
        let result = engine.check("y.x.com", TYPE_AAAA);
        assert_eq!(result.rule_id.as_deref(), Some("any"));
        assert_eq!(result.action, Action::Redirect);
    }

    #[test]
    fn disabled_rule_skipped() {
        let engine = FilterEngine::new();
        let mut r = rule("r1", 0, Action::Block, &["bad.com"], &[]);
        r.enabled = false;
        engine.add_rule(r);
        assert_eq!(engine.check("bad.com", TYPE_A).action, Action::Allow);

        assert!(engine.set_enabled("r1", true));
        assert_eq!(engine.check("bad.com", TYPE_A).action, Action::Block);
    }

    #[test]
    fn remove_rule_unmatches() {
        let engine = FilterEngine::new();
        engine.add_rule(rule("r1", 0, Action::Block, &["a.com"], &[]));
        engine.add_rule(rule("r2", 0, Action::Block, &["b.com"], &[]));
        assert!(engine.remove_rule("r1"));
        assert_eq!(engine.check("a.com", TYPE_A).action, Action::Allow);
        assert_eq!(engine.check("b.com", TYPE_A).action, Action::Block);
        assert!(!engine.remove_rule("r1"));
        assert_eq!(engine.rule_count(), 1);

        engine.clear();
        assert_eq!(engine.rule_count(), 0);
        assert_eq!(engine.check("b.com", TYPE_A).action, Action::Allow);
    }

    #[test]
    fn redirect_carries_ip_and_ttl() {
        let engine = FilterEngine::new();
        let mut r = rule("rd", 0, Action::Redirect, &["*.bad.com"], &[]);
        r.redirect_ip = Some("192.0.2.1".parse().unwrap());
        r.redirect_ttl = 60;
        engine.add_rule(r);
        let result = engine.check("x.bad.com", TYPE_A);
        assert_eq!(result.action, Action::Redirect);
        assert_eq!(result.redirect_ip, Some("192.0.2.1".parse().unwrap()));
        assert_eq!(result.redirect_ttl, 60);
    }
}
