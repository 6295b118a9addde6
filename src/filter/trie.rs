//! 域名前缀树（按标签反向存储）
//!
//! `example.com` 按 [com, example] 的路径落到目标节点的精确槽位；
//! `*.example.com` 落到同一节点的通配符槽位。槽位存规则在引擎规则
//! 表中的下标，不持有规则本身。

use std::collections::HashMap;

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    exact: Option<usize>,
    wildcard: Option<usize>,
}

#[derive(Debug, Default)]
pub struct DomainTrie {
    root: TrieNode,
    len: usize,
}

impl DomainTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入域名模式。`*.` 前缀进通配符槽位，其余进精确槽位。
    /// 同一槽位重复插入时后者覆盖前者。
    pub fn insert(&mut self, pattern: &str, rule_idx: usize) {
        let pattern = pattern.trim().to_lowercase();
        if pattern.is_empty() || pattern == "*" {
            return;
        }

        let (is_wildcard, domain) = match pattern.strip_prefix("*.") {
            Some(rest) => (true, rest),
            None => (false, pattern.as_str()),
        };

        let mut node = &mut self.root;
        for label in domain.rsplit('.') {
            node = node.children.entry(label.to_string()).or_default();
        }

        let slot = if is_wildcard {
            &mut node.wildcard
        } else {
            &mut node.exact
        };
        if slot.replace(rule_idx).is_none() {
            self.len += 1;
        }
    }

    /// 反向遍历查询域名的标签。下行途中记录最近的通配符规则；
    /// 终点节点上精确槽位优先于通配符槽位。
    pub fn match_domain(&self, domain: &str) -> Option<usize> {
        let domain = domain.trim().to_lowercase();
        if domain.is_empty() {
            return None;
        }

        let mut node = &self.root;
        let mut best_wildcard = None;

        for label in domain.rsplit('.') {
            if node.wildcard.is_some() {
                best_wildcard = node.wildcard;
            }
            match node.children.get(label) {
                Some(child) => node = child,
                None => return best_wildcard,
            }
        }

        node.exact.or(node.wildcard).or(best_wildcard)
    }

    /// 删除域名模式对应的槽位。不裁剪空子树。
    pub fn remove(&mut self, pattern: &str) -> bool {
        let pattern = pattern.trim().to_lowercase();
        if pattern.is_empty() {
            return false;
        }

        let (is_wildcard, domain) = match pattern.strip_prefix("*.") {
            Some(rest) => (true, rest),
            None => (false, pattern.as_str()),
        };

        let mut node = &mut self.root;
        for label in domain.rsplit('.') {
            match node.children.get_mut(label) {
                Some(child) => node = child,
                None => return false,
            }
        }

        let slot = if is_wildcard {
            &mut node.wildcard
        } else {
            &mut node.exact
        };
        if slot.take().is_some() {
            self.len -= 1;
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
