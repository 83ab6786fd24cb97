//! Content-filter plugin chain.
//!
//! Plugins inspect (and may rewrite) payloads flowing through the gateway in
//! either direction. Each plugin is wrapped in a mode decorator — enforcing,
//! permissive, audit-only or disabled — so the plugin itself never knows
//! about modes. The chain runs plugins in ascending priority order, keeps
//! running after a modification so later plugins see the rewritten content,
//! and blocks when any plugin blocks.

pub mod chain;
pub mod factory;
pub mod mode;
pub mod pii;
pub mod plugin;
pub mod regex_filter;
pub mod resource;

pub use chain::{ChainOutcome, FilterChain, FilterStats};
pub use factory::{FilterFactory, FilterKind, FilterSpec};
pub use mode::{FilterMode, ModedPlugin};
pub use pii::{MaskStrategy, PiiFilter, PiiFilterConfig};
pub use plugin::{
    FilterAction, FilterDirection, FilterError, FilterOutcome, FilterPlugin, FilterResult,
    Severity, Violation,
};
pub use regex_filter::{RegexFilter, RegexFilterConfig, RegexRule, RuleAction};
pub use resource::{ResourceFilter, ResourceFilterConfig};
