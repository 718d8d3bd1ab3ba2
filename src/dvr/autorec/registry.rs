//! Ordered rule storage with reverse indices
//!
//! Rules iterate in insertion order. Channels, tags and config groups map to
//! the set of rules referencing them so removals of those entities can find
//! their rules without scanning.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use super::rule::{AutorecRule, IndexKeys, RuleId};

#[derive(Default)]
pub struct RuleRegistry {
    rules: IndexMap<RuleId, AutorecRule>,
    by_channel: HashMap<String, IndexSet<RuleId>>,
    by_tag: HashMap<String, IndexSet<RuleId>>,
    by_config: HashMap<String, IndexSet<RuleId>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn contains(&self, id: &RuleId) -> bool {
        self.rules.contains_key(id)
    }

    pub fn get(&self, id: &RuleId) -> Option<&AutorecRule> {
        self.rules.get(id)
    }

    /// Mutable access; callers that touch indexed fields must `reindex` afterwards
    pub fn get_mut(&mut self, id: &RuleId) -> Option<&mut AutorecRule> {
        self.rules.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AutorecRule> {
        self.rules.values()
    }

    pub fn ids(&self) -> Vec<RuleId> {
        self.rules.keys().copied().collect()
    }

    /// Append a rule and index it. Replaces (and re-indexes) a rule with the same id.
    pub fn insert(&mut self, rule: AutorecRule) {
        let id = rule.id;
        let keys = rule.index_keys();
        if let Some(old) = self.rules.insert(id, rule) {
            self.unindex(id, &old.index_keys());
        }
        self.index(id, &keys);
    }

    /// Remove a rule and every reverse-index entry pointing at it
    pub fn remove(&mut self, id: &RuleId) -> Option<AutorecRule> {
        let rule = self.rules.shift_remove(id)?;
        self.unindex(*id, &rule.index_keys());
        Some(rule)
    }

    /// Move a rule between index buckets after its channel/tag/config changed
    pub fn reindex(&mut self, id: RuleId, before: &IndexKeys) {
        let Some(after) = self.rules.get(&id).map(|r| r.index_keys()) else {
            return;
        };
        if *before == after {
            return;
        }
        self.unindex(id, before);
        self.index(id, &after);
    }

    pub fn rules_for_channel(&self, channel: &str) -> Vec<RuleId> {
        bucket(&self.by_channel, channel)
    }

    pub fn rules_for_tag(&self, tag: &str) -> Vec<RuleId> {
        bucket(&self.by_tag, tag)
    }

    pub fn rules_for_config(&self, config: &str) -> Vec<RuleId> {
        bucket(&self.by_config, config)
    }

    /// Whether any reverse index still references `id`
    pub fn is_indexed(&self, id: &RuleId) -> bool {
        [&self.by_channel, &self.by_tag, &self.by_config]
            .iter()
            .any(|index| index.values().any(|set| set.contains(id)))
    }

    fn index(&mut self, id: RuleId, keys: &IndexKeys) {
        if let Some(channel) = &keys.channel {
            self.by_channel.entry(channel.clone()).or_default().insert(id);
        }
        if let Some(tag) = &keys.tag {
            self.by_tag.entry(tag.clone()).or_default().insert(id);
        }
        if let Some(config) = &keys.config {
            self.by_config.entry(config.clone()).or_default().insert(id);
        }
    }

    fn unindex(&mut self, id: RuleId, keys: &IndexKeys) {
        if let Some(channel) = &keys.channel {
            drop_from(&mut self.by_channel, channel, &id);
        }
        if let Some(tag) = &keys.tag {
            drop_from(&mut self.by_tag, tag, &id);
        }
        if let Some(config) = &keys.config {
            drop_from(&mut self.by_config, config, &id);
        }
    }
}

fn bucket(index: &HashMap<String, IndexSet<RuleId>>, key: &str) -> Vec<RuleId> {
    index
        .get(key)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default()
}

fn drop_from(index: &mut HashMap<String, IndexSet<RuleId>>, key: &str, id: &RuleId) {
    if let Some(set) = index.get_mut(key) {
        set.shift_remove(id);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn rule(channel: Option<&str>, config: &str) -> AutorecRule {
        let mut rule = AutorecRule::new(Uuid::new_v4(), Some(config.to_string()));
        rule.channel = channel.map(str::to_string);
        rule
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut registry = RuleRegistry::new();
        let rules: Vec<AutorecRule> = (0..5).map(|_| rule(None, "cfg")).collect();
        let ids: Vec<RuleId> = rules.iter().map(|r| r.id).collect();
        for r in rules {
            registry.insert(r);
        }
        assert_eq!(registry.ids(), ids);

        registry.remove(&ids[2]);
        let expected: Vec<RuleId> = ids.iter().copied().filter(|id| *id != ids[2]).collect();
        assert_eq!(registry.ids(), expected);
        assert_eq!(registry.rules_for_config("cfg"), expected);
    }

    #[test]
    fn test_reindex_moves_between_buckets() {
        let mut registry = RuleRegistry::new();
        let r = rule(Some("ch1"), "cfg");
        let id = r.id;
        registry.insert(r);
        assert_eq!(registry.rules_for_channel("ch1"), vec![id]);

        let before = registry.get(&id).unwrap().index_keys();
        if let Some(r) = registry.get_mut(&id) {
            r.channel = Some("ch2".to_string());
            r.tag = Some("t1".to_string());
        }
        registry.reindex(id, &before);

        assert!(registry.rules_for_channel("ch1").is_empty());
        assert_eq!(registry.rules_for_channel("ch2"), vec![id]);
        assert_eq!(registry.rules_for_tag("t1"), vec![id]);
    }

    #[test]
    fn test_remove_clears_all_indices() {
        let mut registry = RuleRegistry::new();
        let mut r = rule(Some("ch1"), "cfg");
        r.tag = Some("t1".to_string());
        let id = r.id;
        registry.insert(r);
        assert!(registry.is_indexed(&id));

        assert!(registry.remove(&id).is_some());
        assert!(!registry.is_indexed(&id));
        assert!(registry.is_empty());
        assert!(registry.remove(&id).is_none());
    }
}
