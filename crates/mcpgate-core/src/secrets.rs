//! Process-local secret source for virtual-server recipes.

use std::collections::HashMap;

/// Resolves `${SECRET:NAME}` references at dispatch time.
pub trait SecretSource: Send + Sync {
    /// The secret value, if the source knows it.
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads secrets from process environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretSource;

impl SecretSource for EnvSecretSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed map source, for tests and embedded use.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretSource {
    values: HashMap<String, String>,
}

impl StaticSecretSource {
    /// Build from (name, value) pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl SecretSource for StaticSecretSource {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn static_source_resolves_pairs() {
        let source = StaticSecretSource::from_pairs([("A", "1")]);
        assert_eq!(source.get("A").as_deref(), Some("1"));
        assert_eq!(source.get("B"), None);
    }

    #[test]
    #[serial]
    #[allow(unsafe_code)]
    fn env_source_reads_process_env() {
        // Env mutation is process-global; #[serial] keeps this exclusive.
        unsafe { std::env::set_var("MCPGATE_TEST_SECRET", "v") };
        let source = EnvSecretSource;
        assert_eq!(source.get("MCPGATE_TEST_SECRET").as_deref(), Some("v"));
        unsafe { std::env::remove_var("MCPGATE_TEST_SECRET") };
    }
}
