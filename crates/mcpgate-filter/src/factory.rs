//! Plugin construction.
//!
//! Configuration arrives as raw JSON exactly once, here; each plugin kind
//! declares a typed config record and the factory performs the single
//! validated decode. Nothing downstream handles untyped maps.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::FilterChain;
use crate::mode::{FilterMode, ModedPlugin};
use crate::pii::{PiiFilter, PiiFilterConfig};
use crate::plugin::{FilterError, FilterResult};
use crate::regex_filter::{RegexFilter, RegexFilterConfig};
use crate::resource::{ResourceFilter, ResourceFilterConfig};

/// The built-in plugin kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// PII detection and masking
    Pii,
    /// Rule-based regex filter
    Regex,
    /// Resource-URL policy
    Resource,
}

/// Declarative chain entry, as found in gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Plugin kind
    pub kind: FilterKind,
    /// Execution mode
    #[serde(default)]
    pub mode: FilterMode,
    /// Kind-specific configuration
    #[serde(default)]
    pub config: Value,
}

/// Builds plugins from declarative specs.
pub struct FilterFactory;

impl FilterFactory {
    /// Build one moded plugin, decoding `config` against the kind's typed
    /// record.
    pub fn build(kind: FilterKind, config: Value, mode: FilterMode) -> FilterResult<ModedPlugin> {
        let config = if config.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            config
        };
        let plugin: Box<dyn crate::plugin::FilterPlugin> = match kind {
            FilterKind::Pii => {
                let config: PiiFilterConfig = decode(config)?;
                Box::new(PiiFilter::new(config)?)
            }
            FilterKind::Regex => {
                let config: RegexFilterConfig = decode(config)?;
                Box::new(RegexFilter::new(config)?)
            }
            FilterKind::Resource => {
                let config: ResourceFilterConfig = decode(config)?;
                Box::new(ResourceFilter::new(config))
            }
        };
        Ok(ModedPlugin::new(plugin, mode))
    }

    /// Build a whole chain from specs.
    pub fn build_chain(specs: Vec<FilterSpec>) -> FilterResult<FilterChain> {
        let plugins = specs
            .into_iter()
            .map(|spec| Self::build(spec.kind, spec.config, spec.mode))
            .collect::<FilterResult<Vec<_>>>()?;
        Ok(FilterChain::new(plugins))
    }
}

fn decode<T: serde::de::DeserializeOwned>(config: Value) -> FilterResult<T> {
    serde_json::from_value(config).map_err(|e| FilterError::Configuration(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{FilterDirection, FilterPlugin};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn builds_each_kind_from_json() {
        for (kind, config) in [
            (FilterKind::Pii, serde_json::json!({"masking": "partial"})),
            (
                FilterKind::Regex,
                serde_json::json!({"rules": [{"name": "r", "pattern": "x", "severity": "low", "action": "warn"}]}),
            ),
            (FilterKind::Resource, serde_json::json!({})),
        ] {
            let plugin = FilterFactory::build(kind, config, FilterMode::Enforcing).unwrap();
            // Every plugin must be callable after construction.
            plugin.apply(FilterDirection::Outbound, "clean").await.unwrap();
        }
    }

    #[test]
    fn unknown_config_fields_are_rejected_shape_errors_surface() {
        // Wrong type for a known field fails the single validated decode.
        let err = FilterFactory::build(
            FilterKind::Regex,
            serde_json::json!({"rules": "not-a-list"}),
            FilterMode::Enforcing,
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::Configuration(_)));
    }

    #[test]
    fn null_config_means_defaults() {
        let plugin =
            FilterFactory::build(FilterKind::Pii, Value::Null, FilterMode::Enforcing).unwrap();
        assert_eq!(plugin.name(), "pii");
    }

    #[tokio::test]
    async fn clean_payloads_pass_byte_identical() {
        // Full default chain over content with no matches: nothing may move.
        let chain = FilterFactory::build_chain(vec![
            FilterSpec {
                kind: FilterKind::Pii,
                mode: FilterMode::Enforcing,
                config: Value::Null,
            },
            FilterSpec {
                kind: FilterKind::Regex,
                mode: FilterMode::Enforcing,
                config: Value::Null,
            },
            FilterSpec {
                kind: FilterKind::Resource,
                mode: FilterMode::Enforcing,
                config: Value::Null,
            },
        ])
        .unwrap();
        let payload = r#"{"name":"lookup","arguments":{"q":"weather","limit":5}}"#;
        let outcome = chain.apply(FilterDirection::Outbound, payload).await;
        assert!(!outcome.blocked);
        assert!(!outcome.modified);
        assert_eq!(outcome.content, payload);
        assert!(outcome.violations.is_empty());
    }

    #[tokio::test]
    async fn chain_from_specs_orders_by_priority() {
        let chain = FilterFactory::build_chain(vec![
            FilterSpec {
                kind: FilterKind::Resource,
                mode: FilterMode::Enforcing,
                config: Value::Null,
            },
            FilterSpec {
                kind: FilterKind::Pii,
                mode: FilterMode::Enforcing,
                config: Value::Null,
            },
        ])
        .unwrap();
        assert_eq!(chain.len(), 2);
        // PII (priority 10) must run before resource (priority 30): a
        // redacted URL never reaches the resource check. Exercise both.
        let outcome = chain
            .apply(FilterDirection::Outbound, "mail a@b.example")
            .await;
        assert!(!outcome.violations.is_empty());
    }
}
