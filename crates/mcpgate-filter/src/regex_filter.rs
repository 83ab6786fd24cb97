//! Rule-based regex filter.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::plugin::{
    FilterAction, FilterDirection, FilterError, FilterOutcome, FilterPlugin, FilterResult,
    Severity, Violation,
};

/// What a matching rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Rewrite all non-overlapping matches with the rule's replacement
    Replace,
    /// Block the payload
    Block,
    /// Record and warn
    Warn,
    /// Record only
    Audit,
}

/// One configured rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexRule {
    /// Rule name used in violation records
    pub name: String,
    /// Regex source
    pub pattern: String,
    /// Replacement text; required for `replace`
    #[serde(default)]
    pub replacement: Option<String>,
    /// Severity of matches
    pub severity: Severity,
    /// Action on match
    pub action: RuleAction,
}

/// Typed configuration, decoded once at construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegexFilterConfig {
    /// The rule list, applied in order
    #[serde(default)]
    pub rules: Vec<RegexRule>,
}

struct CompiledRule {
    rule: RegexRule,
    regex: Regex,
}

/// The regex plugin.
pub struct RegexFilter {
    rules: Vec<CompiledRule>,
}

impl RegexFilter {
    /// Build from a typed config; every pattern compiles here, once.
    pub fn new(config: RegexFilterConfig) -> FilterResult<Self> {
        let rules = config
            .rules
            .into_iter()
            .map(|rule| {
                if rule.action == RuleAction::Replace && rule.replacement.is_none() {
                    return Err(FilterError::Configuration(format!(
                        "rule '{}' uses replace without a replacement",
                        rule.name
                    )));
                }
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    FilterError::Configuration(format!("rule '{}': {e}", rule.name))
                })?;
                Ok(CompiledRule { rule, regex })
            })
            .collect::<FilterResult<Vec<_>>>()?;
        Ok(Self { rules })
    }
}

#[async_trait]
impl FilterPlugin for RegexFilter {
    fn name(&self) -> &str {
        "regex"
    }

    fn priority(&self) -> i32 {
        20
    }

    async fn apply(
        &self,
        _direction: FilterDirection,
        content: &str,
    ) -> FilterResult<FilterOutcome> {
        let mut violations = Vec::new();
        let mut rewritten = content.to_string();
        let mut blocked = false;
        let mut action = FilterAction::Allow;

        for compiled in &self.rules {
            let scanned = rewritten.clone();
            let matches: Vec<(usize, String)> = compiled
                .regex
                .find_iter(&scanned)
                .map(|m| (m.start(), m.as_str().to_string()))
                .collect();
            if matches.is_empty() {
                continue;
            }

            let (rule_action, replacement) = match compiled.rule.action {
                RuleAction::Replace => (
                    FilterAction::Warn,
                    compiled.rule.replacement.clone(),
                ),
                // A block rule blocks regardless of anything else in the chain.
                RuleAction::Block => (FilterAction::Block, None),
                RuleAction::Warn => (FilterAction::Warn, None),
                RuleAction::Audit => (FilterAction::Audit, None),
            };

            for (position, matched) in &matches {
                violations.push(Violation {
                    kind: format!("regex.{}", compiled.rule.name),
                    pattern: compiled.rule.pattern.clone(),
                    matched: matched.clone(),
                    position: *position,
                    severity: compiled.rule.severity,
                    replacement: replacement.clone(),
                    metadata: serde_json::Map::new(),
                });
            }

            if let Some(replacement) = &replacement {
                rewritten = compiled
                    .regex
                    .replace_all(&scanned, replacement.as_str())
                    .into_owned();
            }
            if rule_action == FilterAction::Block {
                blocked = true;
            }
            if rule_action > action {
                action = rule_action;
            }
        }

        if violations.is_empty() {
            return Ok(FilterOutcome::allow());
        }
        if blocked {
            return Ok(FilterOutcome {
                action: FilterAction::Block,
                blocked: true,
                modified: rewritten != content,
                content: (rewritten != content).then_some(rewritten),
                reason: Some("regex rule blocked the payload".into()),
                violations,
            });
        }
        if rewritten != content {
            Ok(FilterOutcome::modified(action, rewritten, violations))
        } else {
            Ok(FilterOutcome::flagged(action, violations))
        }
    }
}
