//! Provider Pool: rank and hand out candidates for a given model, track
//! per-provider failures, and serve the model catalog.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use gproxy_common::{ConfigDocument, ModelEntry, ProviderConfig};
use rand::seq::SliceRandom;

use crate::resolver::{resolve, ModelMatch};

/// Static, config-derived shape of one provider. Cloned into every snapshot;
/// the mutable side lives in `ProviderRuntimeEntry` next to it.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub priority: i64,
    pub enabled: bool,
    pub models_endpoint: String,
    pub model: Vec<ModelEntry>,
}

impl ProviderEntry {
    fn from_config(config: &ProviderConfig) -> Self {
        Self {
            name: config.provider.clone(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            priority: config.priority,
            enabled: config.enabled,
            models_endpoint: config.models_endpoint.clone(),
            model: config.model.clone(),
        }
    }

    /// `config_eq`: whether two entries came from the same config content,
    /// used to decide whether a reload may carry forward cached runtime
    /// state (cooldown, discovered models) instead of resetting it.
    fn config_eq(&self, other: &ProviderConfig) -> bool {
        self.base_url == other.base_url
            && self.api_key == other.api_key
            && self.priority == other.priority
            && self.enabled == other.enabled
            && self.models_endpoint == other.models_endpoint
            && self.model == other.model
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderRuntimeEntry {
    pub cooldown_until: Option<SystemTime>,
    pub last_error: Option<String>,
    pub last_test_latency_ms: Option<u64>,
    pub last_test_time: Option<SystemTime>,
    pub discovered_models: Vec<String>,
}

impl ProviderRuntimeEntry {
    fn is_eligible(&self, enabled: bool, now: SystemTime) -> bool {
        enabled && self.cooldown_until.is_none_or(|until| until <= now)
    }
}

struct PoolSnapshot {
    entries: Vec<ProviderEntry>,
    runtime: HashMap<String, ProviderRuntimeEntry>,
}

/// One model id surfaced by the public catalog endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: String,
    pub provider: String,
}

pub struct ProviderPool {
    snapshot: arc_swap::ArcSwap<PoolSnapshot>,
}

impl ProviderPool {
    pub fn from_config(doc: &ConfigDocument) -> Self {
        let entries = doc.providers.iter().map(ProviderEntry::from_config).collect();
        let runtime = doc
            .providers
            .iter()
            .map(|p| (p.provider.clone(), ProviderRuntimeEntry::default()))
            .collect();
        Self {
            snapshot: arc_swap::ArcSwap::from_pointee(PoolSnapshot { entries, runtime }),
        }
    }

    /// Rebuild the provider list from a reloaded document, carrying forward
    /// runtime state (cooldown, discovered models) for providers whose
    /// configuration entry is byte-for-byte unchanged.
    pub fn replace_from_config(&self, doc: &ConfigDocument) {
        let previous = self.snapshot.load();
        let mut runtime = HashMap::with_capacity(doc.providers.len());
        let mut entries = Vec::with_capacity(doc.providers.len());

        for config in &doc.providers {
            let carried = previous
                .entries
                .iter()
                .find(|prev| prev.name == config.provider)
                .filter(|prev| prev.config_eq(config))
                .and_then(|_| previous.runtime.get(&config.provider).cloned());
            runtime.insert(config.provider.clone(), carried.unwrap_or_default());
            entries.push(ProviderEntry::from_config(config));
        }

        self.snapshot.store(Arc::new(PoolSnapshot { entries, runtime }));
    }

    /// Providers whose explicit model list is empty and whose discovered
    /// cache is currently empty: the set that still needs discovery before
    /// `candidates`/`catalog` can judge whether they support a model.
    pub fn providers_needing_discovery(&self) -> Vec<ProviderEntry> {
        let snapshot = self.snapshot.load();
        snapshot
            .entries
            .iter()
            .filter(|entry| entry.enabled && entry.model.is_empty())
            .filter(|entry| {
                snapshot
                    .runtime
                    .get(&entry.name)
                    .is_none_or(|runtime| runtime.discovered_models.is_empty())
            })
            .cloned()
            .collect()
    }

    pub fn set_discovered_models(&self, provider: &str, models: Vec<String>) {
        self.snapshot.rcu(|current| {
            let mut runtime = current.runtime.clone();
            runtime.entry(provider.to_string()).or_default().discovered_models = models.clone();
            Arc::new(PoolSnapshot {
                entries: current.entries.clone(),
                runtime,
            })
        });
    }

    /// Ordered, filtered, shuffled-within-priority candidate list for `model`.
    pub fn candidates(&self, model: &str) -> Vec<(ProviderEntry, ModelMatch)> {
        let snapshot = self.snapshot.load();
        let now = SystemTime::now();

        let mut matched: Vec<(ProviderEntry, ModelMatch)> = snapshot
            .entries
            .iter()
            .filter_map(|entry| {
                let runtime = snapshot.runtime.get(&entry.name)?;
                if !runtime.is_eligible(entry.enabled, now) {
                    return None;
                }
                let matched = resolve(entry, model, &runtime.discovered_models)?;
                Some((entry.clone(), matched))
            })
            .collect();

        matched.sort_by(|a, b| b.0.priority.cmp(&a.0.priority));

        let mut out = Vec::with_capacity(matched.len());
        let mut rng = rand::rng();
        let mut start = 0;
        while start < matched.len() {
            let priority = matched[start].0.priority;
            let mut end = start + 1;
            while end < matched.len() && matched[end].0.priority == priority {
                end += 1;
            }
            let group = &mut matched[start..end];
            group.shuffle(&mut rng);
            out.extend_from_slice(group);
            start = end;
        }
        out
    }

    pub fn mark_success(&self, provider: &str, latency_ms: u64) {
        self.snapshot.rcu(|current| {
            let mut runtime = current.runtime.clone();
            let entry = runtime.entry(provider.to_string()).or_default();
            entry.last_error = None;
            entry.last_test_latency_ms = Some(latency_ms);
            entry.last_test_time = Some(SystemTime::now());
            Arc::new(PoolSnapshot {
                entries: current.entries.clone(),
                runtime,
            })
        });
    }

    /// `cooldownUntil` is monotonic: a new failure may extend it but never
    /// shortens it relative to a prior, still-active cooldown.
    pub fn mark_failure(&self, provider: &str, reason: String, cooldown_period: Duration) {
        self.snapshot.rcu(|current| {
            let mut runtime = current.runtime.clone();
            let entry = runtime.entry(provider.to_string()).or_default();
            entry.last_error = Some(reason.clone());
            if !cooldown_period.is_zero() {
                let candidate = SystemTime::now() + cooldown_period;
                entry.cooldown_until = Some(match entry.cooldown_until {
                    Some(existing) if existing > candidate => existing,
                    _ => candidate,
                });
            }
            Arc::new(PoolSnapshot {
                entries: current.entries.clone(),
                runtime,
            })
        });
    }

    pub fn reset(&self, provider: &str) {
        self.snapshot.rcu(|current| {
            let mut runtime = current.runtime.clone();
            runtime.entry(provider.to_string()).or_default().cooldown_until = None;
            Arc::new(PoolSnapshot {
                entries: current.entries.clone(),
                runtime,
            })
        });
    }

    pub fn runtime_of(&self, provider: &str) -> Option<ProviderRuntimeEntry> {
        self.snapshot.load().runtime.get(provider).cloned()
    }

    /// Catalog aggregation (§4.C edge case): all enabled providers regardless
    /// of cooldown, explicit entries minus wildcards plus discovered ids,
    /// deduplicated by id (first provider wins).
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        let snapshot = self.snapshot.load();
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        for entry in snapshot.entries.iter().filter(|entry| entry.enabled) {
            if !entry.model.is_empty() {
                for item in &entry.model {
                    if item.is_wildcard() {
                        continue;
                    }
                    let id = item.pattern().to_string();
                    if seen.insert(id.clone()) {
                        out.push(CatalogEntry {
                            id,
                            provider: entry.name.clone(),
                        });
                    }
                }
            } else if let Some(runtime) = snapshot.runtime.get(&entry.name) {
                for id in &runtime.discovered_models {
                    if seen.insert(id.clone()) {
                        out.push(CatalogEntry {
                            id: id.clone(),
                            provider: entry.name.clone(),
                        });
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_common::Preferences;

    fn doc_with(providers: Vec<ProviderConfig>) -> ConfigDocument {
        ConfigDocument {
            api_key: "local".to_string(),
            preferences: Preferences::default(),
            providers,
        }
    }

    fn provider(name: &str, priority: i64, model: &str) -> ProviderConfig {
        ProviderConfig {
            provider: name.to_string(),
            base_url: "https://example.com".to_string(),
            api_key: "key".to_string(),
            priority,
            enabled: true,
            models_endpoint: "/v1/models".to_string(),
            model: vec![ModelEntry::Pattern(model.to_string())],
        }
    }

    #[test]
    fn candidates_excludes_disabled_and_non_matching() {
        let mut b = provider("b", 5, "gpt-4");
        b.enabled = false;
        let doc = doc_with(vec![provider("a", 10, "gpt-4"), b, provider("c", 1, "claude")]);
        let pool = ProviderPool::from_config(&doc);

        let candidates = pool.candidates("gpt-4");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0.name, "a");
    }

    #[test]
    fn candidates_are_grouped_by_priority_descending() {
        let doc = doc_with(vec![provider("low", 1, "gpt-4"), provider("high", 10, "gpt-4")]);
        let pool = ProviderPool::from_config(&doc);
        let candidates = pool.candidates("gpt-4");
        assert_eq!(candidates[0].0.name, "high");
        assert_eq!(candidates[1].0.name, "low");
    }

    #[test]
    fn mark_failure_sets_cooldown_and_excludes_from_candidates() {
        let doc = doc_with(vec![provider("a", 10, "gpt-4")]);
        let pool = ProviderPool::from_config(&doc);
        pool.mark_failure("a", "500".to_string(), Duration::from_secs(300));
        assert!(pool.candidates("gpt-4").is_empty());
        assert!(pool.runtime_of("a").unwrap().cooldown_until.is_some());
    }

    #[test]
    fn mark_failure_is_monotonic() {
        let doc = doc_with(vec![provider("a", 10, "gpt-4")]);
        let pool = ProviderPool::from_config(&doc);
        pool.mark_failure("a", "first".to_string(), Duration::from_secs(300));
        let first_until = pool.runtime_of("a").unwrap().cooldown_until.unwrap();

        pool.mark_failure("a", "second".to_string(), Duration::from_secs(1));
        let second_until = pool.runtime_of("a").unwrap().cooldown_until.unwrap();
        assert!(second_until >= first_until);
    }

    #[test]
    fn zero_cooldown_period_disables_cooldown() {
        let doc = doc_with(vec![provider("a", 10, "gpt-4")]);
        let pool = ProviderPool::from_config(&doc);
        pool.mark_failure("a", "500".to_string(), Duration::from_secs(0));
        assert!(pool.runtime_of("a").unwrap().cooldown_until.is_none());
        assert_eq!(pool.candidates("gpt-4").len(), 1);
    }

    #[test]
    fn reset_clears_cooldown() {
        let doc = doc_with(vec![provider("a", 10, "gpt-4")]);
        let pool = ProviderPool::from_config(&doc);
        pool.mark_failure("a", "500".to_string(), Duration::from_secs(300));
        pool.reset("a");
        assert!(pool.runtime_of("a").unwrap().cooldown_until.is_none());
    }

    #[test]
    fn alias_entry_matches_and_resolves() {
        let mut p = provider("a", 10, "ignored");
        p.model = vec![ModelEntry::Alias {
            alias: "my-claude".to_string(),
            upstream: "claude-3-5-sonnet".to_string(),
        }];
        let doc = doc_with(vec![p]);
        let pool = ProviderPool::from_config(&doc);
        let candidates = pool.candidates("my-claude");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].1.effective_model, "claude-3-5-sonnet");
        assert!(candidates[0].1.aliased);
    }

    #[test]
    fn catalog_excludes_wildcard_entries_and_dedups() {
        let mut p1 = provider("a", 10, "gpt-4");
        p1.model.push(ModelEntry::Pattern("gpt-4*".to_string()));
        let p2 = provider("b", 5, "gpt-4");
        let doc = doc_with(vec![p1, p2]);
        let pool = ProviderPool::from_config(&doc);

        let catalog = pool.catalog();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].id, "gpt-4");
        assert_eq!(catalog[0].provider, "a");
    }

    #[test]
    fn replace_from_config_carries_cooldown_for_unchanged_provider() {
        let doc = doc_with(vec![provider("a", 10, "gpt-4")]);
        let pool = ProviderPool::from_config(&doc);
        pool.mark_failure("a", "500".to_string(), Duration::from_secs(300));

        pool.replace_from_config(&doc);
        assert!(pool.runtime_of("a").unwrap().cooldown_until.is_some());
    }

    #[test]
    fn replace_from_config_resets_runtime_for_changed_provider() {
        let doc = doc_with(vec![provider("a", 10, "gpt-4")]);
        let pool = ProviderPool::from_config(&doc);
        pool.mark_failure("a", "500".to_string(), Duration::from_secs(300));

        let mut changed = provider("a", 10, "gpt-4");
        changed.base_url = "https://changed.example.com".to_string();
        let doc2 = doc_with(vec![changed]);
        pool.replace_from_config(&doc2);
        assert!(pool.runtime_of("a").unwrap().cooldown_until.is_none());
    }
}
