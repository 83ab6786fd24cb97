//! The ordered plugin chain.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::warn;

use crate::mode::ModedPlugin;
use crate::plugin::{FilterAction, FilterDirection, FilterPlugin, Violation};

/// Per-plugin counters, updated lock-free outside any request-critical path.
#[derive(Debug, Default)]
pub struct FilterStats {
    /// Payloads inspected
    pub applied: AtomicU64,
    /// Payloads blocked
    pub blocked: AtomicU64,
    /// Payloads rewritten
    pub modified: AtomicU64,
    /// Violations recorded
    pub violations: AtomicU64,
    /// Plugin errors (skipped, fail-open)
    pub errors: AtomicU64,
}

impl FilterStats {
    /// Snapshot as JSON for introspection surfaces.
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "applied": self.applied.load(Ordering::Relaxed),
            "blocked": self.blocked.load(Ordering::Relaxed),
            "modified": self.modified.load(Ordering::Relaxed),
            "violations": self.violations.load(Ordering::Relaxed),
            "errors": self.errors.load(Ordering::Relaxed),
        })
    }
}

/// Aggregated verdict of the whole chain.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    /// True when any plugin blocked
    pub blocked: bool,
    /// True when any plugin rewrote the content
    pub modified: bool,
    /// The content after every plugin ran
    pub content: String,
    /// Strongest action seen
    pub action: FilterAction,
    /// Reason from the blocking plugin, if any
    pub reason: Option<String>,
    /// Violations accumulated across plugins
    pub violations: Vec<Violation>,
}

/// Priority-ordered chain of moded plugins.
pub struct FilterChain {
    plugins: Vec<(ModedPlugin, FilterStats)>,
}

impl FilterChain {
    /// Build a chain; plugins are sorted by ascending priority.
    pub fn new(mut plugins: Vec<ModedPlugin>) -> Self {
        plugins.sort_by_key(ModedPlugin::priority);
        Self {
            plugins: plugins
                .into_iter()
                .map(|p| (p, FilterStats::default()))
                .collect(),
        }
    }

    /// Chain with no plugins; everything passes.
    pub fn empty() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Number of plugins in the chain.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// True when the chain has no plugins.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run every plugin over the content.
    ///
    /// The chain keeps running after a modification so later plugins see the
    /// rewritten content, and it keeps running after a block so the full
    /// violation list is reported. Plugin errors are logged, counted and
    /// skipped: a broken filter must not take unrelated traffic down.
    pub async fn apply(&self, direction: FilterDirection, content: &str) -> ChainOutcome {
        let mut outcome = ChainOutcome {
            blocked: false,
            modified: false,
            content: content.to_string(),
            action: FilterAction::Allow,
            reason: None,
            violations: Vec::new(),
        };

        for (plugin, stats) in &self.plugins {
            stats.applied.fetch_add(1, Ordering::Relaxed);
            match plugin.apply(direction, &outcome.content).await {
                Ok(result) => {
                    if result.action > outcome.action {
                        outcome.action = result.action;
                    }
                    if result.blocked {
                        outcome.blocked = true;
                        stats.blocked.fetch_add(1, Ordering::Relaxed);
                        if outcome.reason.is_none() {
                            outcome.reason = result.reason.clone();
                        }
                    }
                    if result.modified
                        && let Some(new_content) = result.content
                    {
                        outcome.modified = true;
                        outcome.content = new_content;
                        stats.modified.fetch_add(1, Ordering::Relaxed);
                    }
                    stats
                        .violations
                        .fetch_add(result.violations.len() as u64, Ordering::Relaxed);
                    outcome.violations.extend(result.violations);
                }
                Err(e) => {
                    stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(plugin = plugin.name(), error = %e, "filter plugin failed, skipping");
                }
            }
        }
        outcome
    }

    /// Per-plugin statistics snapshot.
    pub fn stats(&self) -> Value {
        Value::Object(
            self.plugins
                .iter()
                .map(|(plugin, stats)| (plugin.name().to_string(), stats.snapshot()))
                .collect(),
        )
    }
}
