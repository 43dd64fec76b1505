//! Plugin manifests, discovery, and the startup registry.
//!
//! A plugin is declared by a [`PluginManifest`] and implemented by a
//! [`PluginFactory`] producing a [`PluginRuntime`]. Built-in plugins ship
//! their manifests in code (the entry-point table); plugin directories may
//! carry `plugin.toml` manifests that override the declarative parts of a
//! same-named built-in. The registry is assembled once at startup and
//! immutable afterwards.

mod context;
mod discovery;
mod registry;

pub use context::PluginContext;
pub use discovery::{DiscoveredManifest, ManifestSource, discover};
pub use registry::PluginRegistry;

use std::sync::Arc;

use serde::Deserialize;

use crate::{
    hooks::Hook, protocol::WireFormat, proxy::ProviderAdapter, scheduler::ScheduledTask,
};

/// Static declarations of a plugin.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Provider plugins contribute an adapter and routes; system plugins
    /// contribute hooks and tasks only.
    #[serde(default)]
    pub is_provider: bool,

    /// Hard dependencies: loading aborts when one is missing.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Soft dependencies: the plugin must function without them.
    #[serde(default)]
    pub optional_requires: Vec<String>,

    /// Route groups mounted under a prefix.
    #[serde(default)]
    pub routers: Vec<RouterDecl>,

    /// Translations this plugin contributes.
    #[serde(default)]
    pub format_adapters: Vec<AdapterDecl>,

    /// Translations this plugin consumes but does not provide; resolved
    /// at startup, unresolved pairs fail the boot.
    #[serde(default)]
    pub required_format_adapters: Vec<AdapterDecl>,

    /// Scheduled task names the plugin registers.
    #[serde(default)]
    pub tasks: Vec<String>,

    /// Safe to load in CLI (non-server) contexts.
    #[serde(default)]
    pub cli_safe: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterDecl {
    pub prefix: String,
}

/// A `(client format, upstream format)` translation pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AdapterDecl {
    pub client: WireFormat,
    pub upstream: WireFormat,
}

impl AdapterDecl {
    /// Resolvable iff it is an identity pair or a built-in converter
    /// exists.
    pub fn is_resolvable(&self) -> bool {
        self.client == self.upstream || crate::convert::adapter_for(self.client, self.upstream).is_some()
    }
}

/// Creates runtime instances from a manifest.
pub trait PluginFactory: Send + Sync {
    fn manifest(&self) -> PluginManifest;

    fn create(&self, context: &PluginContext) -> anyhow::Result<Box<dyn PluginRuntime>>;
}

/// A live plugin instance.
pub trait PluginRuntime: Send + Sync {
    /// Provider adapter, for provider plugins.
    fn provider(&self) -> Option<Arc<dyn ProviderAdapter>> {
        None
    }

    /// Hooks to register on the bus.
    fn hooks(&self) -> Vec<Arc<dyn Hook>> {
        Vec::new()
    }

    /// Scheduled tasks to register.
    fn tasks(&self) -> Vec<Arc<dyn ScheduledTask>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn manifest_parses_from_toml() {
        let manifest = indoc! {r#"
            name = "claude_api"
            version = "1.0.0"
            is_provider = true
            dependencies = []
            tasks = ["credential_refresh"]

            [[routers]]
            prefix = "/claude"

            [[format_adapters]]
            client = "chat_completions"
            upstream = "anthropic_messages"
        "#};

        let manifest: PluginManifest = toml::from_str(manifest).unwrap();

        assert_eq!(manifest.name, "claude_api");
        assert!(manifest.is_provider);
        assert_eq!(manifest.routers[0].prefix, "/claude");
        assert_eq!(manifest.format_adapters[0].client, WireFormat::ChatCompletions);
        assert!(manifest.format_adapters[0].is_resolvable());
    }

    #[test]
    fn identity_adapter_pairs_resolve() {
        let decl = AdapterDecl {
            client: WireFormat::Responses,
            upstream: WireFormat::Responses,
        };
        assert!(decl.is_resolvable());
    }
}
