//! Execution-mode decorator.
//!
//! Plugins never see modes; the decorator rewrites their outcome after the
//! fact. `disabled` short-circuits to allow without running the plugin,
//! `audit-only` converts every action to audit, and `permissive` downgrades
//! blocks to warnings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::plugin::{FilterAction, FilterDirection, FilterOutcome, FilterPlugin, FilterResult};

/// How a plugin's verdicts are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterMode {
    /// Apply actions as declared
    #[default]
    Enforcing,
    /// Downgrade `block` to `warn`
    Permissive,
    /// Convert every action to `audit`
    AuditOnly,
    /// Skip the plugin entirely
    Disabled,
}

/// A plugin with its execution mode.
pub struct ModedPlugin {
    inner: Box<dyn FilterPlugin>,
    mode: FilterMode,
}

impl std::fmt::Debug for ModedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModedPlugin")
            .field("inner", &self.inner.name())
            .field("mode", &self.mode)
            .finish()
    }
}

impl ModedPlugin {
    /// Wrap a plugin in a mode.
    pub fn new(inner: Box<dyn FilterPlugin>, mode: FilterMode) -> Self {
        Self { inner, mode }
    }

    /// The configured mode.
    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    fn rewrite(&self, mut outcome: FilterOutcome) -> FilterOutcome {
        match self.mode {
            FilterMode::Enforcing => outcome,
            FilterMode::Permissive => {
                if outcome.action == FilterAction::Block {
                    outcome.action = FilterAction::Warn;
                    outcome.blocked = false;
                }
                outcome
            }
            FilterMode::AuditOnly => {
                outcome.action = FilterAction::Audit;
                outcome.blocked = false;
                outcome
            }
            FilterMode::Disabled => FilterOutcome::allow(),
        }
    }
}

#[async_trait]
impl FilterPlugin for ModedPlugin {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    async fn apply(
        &self,
        direction: FilterDirection,
        content: &str,
    ) -> FilterResult<FilterOutcome> {
        if self.mode == FilterMode::Disabled {
            return Ok(FilterOutcome::allow());
        }
        let outcome = self.inner.apply(direction, content).await?;
        Ok(self.rewrite(outcome))
    }
}
