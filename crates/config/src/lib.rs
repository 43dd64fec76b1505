//! Configuration for the ccproxy server.
//!
//! Settings are loaded from a TOML file, either passed explicitly on the
//! command line or discovered at `$XDG_CONFIG_HOME/ccproxy/config.toml`
//! (falling back to `$HOME/.config/ccproxy/config.toml`). String values may
//! reference environment variables with `${VAR}` syntax; expansion happens
//! before deserialization so secrets never need to live in the file itself.

mod loader;
mod plugins;
mod providers;
mod scheduler;
mod server;

pub use loader::{discover_config_path, load};
pub use plugins::PluginsConfig;
pub use providers::{ModelCardConfig, ProviderConfig, ProviderKind};
pub use scheduler::SchedulerConfig;
pub use server::ServerConfig;

use indexmap::IndexMap;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,

    /// Map of provider configurations, keyed by plugin name.
    pub providers: IndexMap<String, ProviderConfig>,

    /// Plugin discovery and enablement.
    pub plugins: PluginsConfig,

    /// Scheduler defaults.
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Whether any provider is configured.
    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn config_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert!(!config.has_providers());
        assert_eq!(config.server.listen_address, "127.0.0.1:8000");
        assert!(!config.server.client_auth);
    }

    #[test]
    fn config_with_provider() {
        let config = indoc! {r#"
            [server]
            listen_address = "0.0.0.0:9000"

            [providers.claude_api]
            type = "claude-api"

            [providers.codex]
            type = "codex"
            base_url = "https://example.com/backend-api/codex"
        "#};

        let config: Config = toml::from_str(config).unwrap();

        assert!(config.has_providers());
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.server.listen_address, "0.0.0.0:9000");

        let codex = &config.providers["codex"];
        assert!(matches!(codex.kind, ProviderKind::Codex));
        assert_eq!(codex.base_url.as_deref(), Some("https://example.com/backend-api/codex"));
    }

    #[test]
    fn config_rejects_unknown_top_level_key() {
        let err = toml::from_str::<Config>("nonsense = true").unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }
}
