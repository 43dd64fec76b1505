use std::sync::Arc;

/// Services handed to plugin factories at instantiation time.
///
/// The registry owns the runtimes; plugins reach shared services through
/// this context instead of holding onto global state.
#[derive(Clone)]
pub struct PluginContext {
    /// Full server configuration.
    pub config: Arc<config::Config>,

    /// Shared HTTP connection pool.
    pub http: reqwest::Client,

    /// This plugin's own configuration table, when the config file has
    /// one.
    pub plugin_config: Option<toml::Value>,
}

impl PluginContext {
    pub fn new(config: Arc<config::Config>, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            plugin_config: None,
        }
    }

    pub fn for_plugin(&self, name: &str) -> Self {
        let mut context = self.clone();
        context.plugin_config = self.config.plugins.config_for(name).cloned();
        context
    }

    /// Provider configuration for this plugin, when one exists.
    pub fn provider_config(&self, name: &str) -> Option<&config::ProviderConfig> {
        self.config.providers.get(name)
    }
}
