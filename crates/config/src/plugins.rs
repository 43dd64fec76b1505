use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;

/// Plugin discovery and enablement settings.
///
/// Unknown keys are per-plugin configuration tables, captured by the
/// flattened map.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directories scanned for `plugin.toml` manifests. Filesystem plugins
    /// override built-in plugins of the same name.
    pub directories: Vec<PathBuf>,

    /// Allowlist. When non-empty, only these plugins load.
    pub enabled_plugins: Vec<String>,

    /// Denylist. Always wins over the allowlist.
    pub disabled_plugins: Vec<String>,

    /// Free-form per-plugin configuration tables. A table with
    /// `enabled = false` adds the plugin to the effective denylist.
    #[serde(flatten)]
    pub plugin_config: IndexMap<String, toml::Value>,
}

impl PluginsConfig {
    /// The effective denylist: explicit entries plus plugins whose own
    /// config table carries `enabled = false`.
    pub fn effective_denylist(&self) -> Vec<String> {
        let mut deny = self.disabled_plugins.clone();

        for (name, value) in &self.plugin_config {
            let disabled = value
                .get("enabled")
                .and_then(toml::Value::as_bool)
                .is_some_and(|enabled| !enabled);

            if disabled && !deny.contains(name) {
                deny.push(name.clone());
            }
        }

        deny
    }

    /// Configuration table for a plugin, if present.
    pub fn config_for(&self, name: &str) -> Option<&toml::Value> {
        self.plugin_config.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn denylist_unions_disabled_tables() {
        let config = indoc! {r#"
            disabled_plugins = ["request_tracer"]

            [codex]
            enabled = false

            [claude_api]
            enabled = true
        "#};

        let config: PluginsConfig = toml::from_str(config).unwrap();
        let deny = config.effective_denylist();

        assert_eq!(deny, ["request_tracer", "codex"]);
    }

    #[test]
    fn plugin_tables_are_reachable() {
        let config = indoc! {r#"
            [request_tracer]
            directory = "/tmp/traces"
        "#};

        let config: PluginsConfig = toml::from_str(config).unwrap();
        let table = config.config_for("request_tracer").unwrap();

        assert_eq!(
            table.get("directory").and_then(toml::Value::as_str),
            Some("/tmp/traces")
        );
    }
}
